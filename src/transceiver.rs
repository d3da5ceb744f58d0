//! The stateful packet session: a byte-at-a-time receive state machine and
//! the matching escaped, checksummed send path.
//!
//! One [`Transceiver`] owns one receive session. It consumes whatever bytes
//! the transport has ready during [`Transceiver::update`], never blocks, and
//! hands every verified frame to a [`PacketHandler`]. All protocol errors
//! are recoverable: the machine always returns to a well-defined state and
//! keeps parsing.

use embedded_hal_nb::serial::{Read, Write};

use crate::codec::{self, END, ESCAPE, HEADER};
use crate::topic::{self, Topic, TopicError};

/// Default receive buffer capacity, bounding the declared length field.
pub const MAX_PACKET_SIZE: usize = 256;

/// Recoverable protocol errors reported through [`PacketHandler::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Body received in full but the checksum did not match; nothing was
    /// delivered.
    ChecksumMismatch,
    /// A frame in progress went idle past the configured budget and was
    /// abandoned.
    IncompletePacket,
    /// Declared or actual length exceeded the receive buffer capacity.
    BufferOverflow,
    /// A header marker appeared where it should not: either mid-frame
    /// (the partial frame is dropped and a new one begins) or the inverse,
    /// a non-header byte arrived between frames.
    UnexpectedHeader,
    /// The byte after an escape marker was not a reserved control byte.
    InvalidEscape,
}

impl ErrorKind {
    /// Stable single-byte encoding, used by [`crate::meta::ErrorReport`].
    pub const fn to_wire(self) -> u8 {
        match self {
            ErrorKind::ChecksumMismatch => 0,
            ErrorKind::IncompletePacket => 1,
            ErrorKind::BufferOverflow => 2,
            ErrorKind::UnexpectedHeader => 3,
            ErrorKind::InvalidEscape => 4,
        }
    }

    pub const fn from_wire(byte: u8) -> Option<ErrorKind> {
        match byte {
            0 => Some(ErrorKind::ChecksumMismatch),
            1 => Some(ErrorKind::IncompletePacket),
            2 => Some(ErrorKind::BufferOverflow),
            3 => Some(ErrorKind::UnexpectedHeader),
            4 => Some(ErrorKind::InvalidEscape),
            _ => None,
        }
    }
}

/// A verified frame. The payload borrow is only valid for the duration of
/// the handler call; copy out whatever outlives it.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub topic_id: u16,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// Decode the payload into a typed topic value. Fails closed unless the
    /// topic id and exact byte size both match.
    pub fn unpack<T: Topic>(&self) -> Result<T, TopicError> {
        topic::unpack(self.topic_id, self.payload)
    }
}

/// Receiver-side callbacks. The transceiver holds at most one handler per
/// call; multiplexing to several listeners is the caller's business.
pub trait PacketHandler {
    fn on_packet(&mut self, packet: Packet<'_>);

    fn on_error(&mut self, kind: ErrorKind, partial: &[u8]) {
        let _ = (kind, partial);
    }

    /// A stream-boundary marker was observed between frames.
    fn on_stream_end(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    WaitingForHeader,
    ReceivingChecksum,
    ReceivingTopicId,
    ReceivingLength,
    ReceivingData,
    ReceivingEscape,
}

/// Errors from the send path.
#[derive(Debug)]
pub enum SendError<E> {
    PayloadTooLarge { len: usize, max: usize },
    Topic(TopicError),
    Write(E),
}

impl<E> From<TopicError> for SendError<E> {
    fn from(value: TopicError) -> Self {
        SendError::Topic(value)
    }
}

/// One framing session over one transport. `N` fixes the receive buffer
/// capacity and the largest accepted declared length.
#[derive(Debug)]
pub struct Transceiver<const N: usize = MAX_PACKET_SIZE> {
    state: ReceiveState,
    expected_checksum: u16,
    topic_id: u16,
    declared_len: u16,
    field_bytes: u8,
    buf: heapless::Vec<u8, N>,
    idle_limit: Option<u32>,
    idle_polls: u32,
}

impl<const N: usize> Default for Transceiver<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Transceiver<N> {
    pub fn new() -> Self {
        Transceiver {
            state: ReceiveState::WaitingForHeader,
            expected_checksum: 0,
            topic_id: 0,
            declared_len: 0,
            field_bytes: 0,
            buf: heapless::Vec::new(),
            idle_limit: None,
            idle_polls: 0,
        }
    }

    /// Like [`Transceiver::new`], but a frame left in progress for `polls`
    /// consecutive empty [`Transceiver::update`] calls is abandoned with
    /// [`ErrorKind::IncompletePacket`].
    pub fn with_idle_limit(polls: u32) -> Self {
        Transceiver {
            idle_limit: Some(polls),
            ..Self::new()
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Whether a frame is currently in progress.
    pub fn mid_frame(&self) -> bool {
        self.state != ReceiveState::WaitingForHeader
    }

    /// Drive the state machine with one received byte. O(1), synchronous,
    /// and total: no input sequence can wedge the machine.
    pub fn feed<H: PacketHandler>(&mut self, byte: u8, handler: &mut H) {
        self.idle_polls = 0;
        match self.state {
            ReceiveState::WaitingForHeader => match byte {
                HEADER => self.begin_frame(),
                END => handler.on_stream_end(),
                other => {
                    // Out-of-frame garbage; the stream resynchronizes on
                    // the next header marker.
                    log::trace!("discarding out-of-frame byte {:#04x}", other);
                    handler.on_error(ErrorKind::UnexpectedHeader, &[other]);
                }
            },
            ReceiveState::ReceivingChecksum => {
                self.expected_checksum = (self.expected_checksum << 8) | u16::from(byte);
                if self.second_field_byte() {
                    self.state = ReceiveState::ReceivingTopicId;
                }
            }
            ReceiveState::ReceivingTopicId => {
                self.topic_id = (self.topic_id << 8) | u16::from(byte);
                if self.second_field_byte() {
                    self.state = ReceiveState::ReceivingLength;
                }
            }
            ReceiveState::ReceivingLength => {
                self.declared_len = (self.declared_len << 8) | u16::from(byte);
                if self.second_field_byte() {
                    if self.declared_len as usize > N {
                        log::warn!(
                            "declared length {} exceeds capacity {}",
                            self.declared_len,
                            N
                        );
                        handler.on_error(ErrorKind::BufferOverflow, &[]);
                        self.state = ReceiveState::WaitingForHeader;
                    } else if self.declared_len == 0 {
                        self.complete(handler);
                    } else {
                        self.state = ReceiveState::ReceivingData;
                    }
                }
            }
            ReceiveState::ReceivingData => match byte {
                ESCAPE => self.state = ReceiveState::ReceivingEscape,
                HEADER => {
                    // Resynchronize: the partial frame is lost, and the
                    // header byte just consumed already opens the next one.
                    log::warn!(
                        "header marker inside frame after {} payload bytes",
                        self.buf.len()
                    );
                    handler.on_error(ErrorKind::UnexpectedHeader, &self.buf);
                    self.begin_frame();
                }
                data => self.store(data, handler),
            },
            ReceiveState::ReceivingEscape => {
                if codec::is_reserved(byte) {
                    self.state = ReceiveState::ReceivingData;
                    self.store(byte, handler);
                } else {
                    log::warn!("escape marker followed by non-reserved byte {:#04x}", byte);
                    handler.on_error(ErrorKind::InvalidEscape, &self.buf);
                    self.state = ReceiveState::WaitingForHeader;
                }
            }
        }
    }

    /// Consume every byte the transport has ready, without blocking.
    ///
    /// Frames are delivered in the order their final byte arrives. A
    /// transport error aborts the poll and is returned; the session itself
    /// stays usable.
    pub fn update<Rx, H>(&mut self, rx: &mut Rx, handler: &mut H) -> Result<(), Rx::Error>
    where
        Rx: Read,
        H: PacketHandler,
    {
        let mut received = false;
        loop {
            match rx.read() {
                Ok(byte) => {
                    received = true;
                    self.feed(byte, handler);
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        if !received {
            self.poll_idle(handler);
        }
        Ok(())
    }

    /// Frame and write a raw payload, one byte at a time: header, payload
    /// checksum, topic id, length (big-endian), then the escaped payload.
    ///
    /// Nothing is written if the payload does not fit a frame. Bytes may be
    /// left queued in a buffering transport; draining it is the caller's
    /// business.
    pub fn send<Tx>(&self, tx: &mut Tx, topic_id: u16, payload: &[u8]) -> Result<(), SendError<Tx::Error>>
    where
        Tx: Write,
    {
        if payload.len() > N || payload.len() > u16::MAX as usize {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: N.min(u16::MAX as usize),
            });
        }
        let checksum = codec::checksum(payload);
        send_byte(tx, HEADER)?;
        for byte in checksum.to_be_bytes() {
            send_byte(tx, byte)?;
        }
        for byte in topic_id.to_be_bytes() {
            send_byte(tx, byte)?;
        }
        for byte in (payload.len() as u16).to_be_bytes() {
            send_byte(tx, byte)?;
        }
        for byte in codec::escape(payload) {
            send_byte(tx, byte)?;
        }
        log::trace!("sent topic {} ({} bytes)", topic_id, payload.len());
        Ok(())
    }

    /// Pack a typed topic value and send it.
    pub fn send_topic<T, Tx>(&self, tx: &mut Tx, value: &T) -> Result<(), SendError<Tx::Error>>
    where
        T: Topic,
        Tx: Write,
    {
        let mut buf = [0u8; N];
        let body = buf
            .get_mut(..T::SIZE)
            .ok_or(SendError::PayloadTooLarge { len: T::SIZE, max: N })?;
        value.encode(body)?;
        self.send(tx, T::TOPIC_ID, body)
    }

    /// Write a standalone stream-boundary marker. Carries no payload and is
    /// orthogonal to framing.
    pub fn send_end<Tx>(&self, tx: &mut Tx) -> Result<(), SendError<Tx::Error>>
    where
        Tx: Write,
    {
        send_byte(tx, END)
    }

    fn begin_frame(&mut self) {
        self.state = ReceiveState::ReceivingChecksum;
        self.expected_checksum = 0;
        self.topic_id = 0;
        self.declared_len = 0;
        self.field_bytes = 0;
        self.buf.clear();
    }

    /// Two-byte header fields arrive high byte first; returns true once the
    /// low byte has been folded in.
    fn second_field_byte(&mut self) -> bool {
        if self.field_bytes == 0 {
            self.field_bytes = 1;
            false
        } else {
            self.field_bytes = 0;
            true
        }
    }

    fn store<H: PacketHandler>(&mut self, byte: u8, handler: &mut H) {
        if self.buf.push(byte).is_err() || self.buf.len() > self.declared_len as usize {
            // Cannot happen while declared_len <= N, but guarded.
            handler.on_error(ErrorKind::BufferOverflow, &self.buf);
            self.state = ReceiveState::WaitingForHeader;
            return;
        }
        if self.buf.len() == self.declared_len as usize {
            self.complete(handler);
        }
    }

    fn complete<H: PacketHandler>(&mut self, handler: &mut H) {
        let computed = codec::checksum(&self.buf);
        if computed == self.expected_checksum {
            log::trace!("delivering topic {} ({} bytes)", self.topic_id, self.buf.len());
            handler.on_packet(Packet {
                topic_id: self.topic_id,
                payload: &self.buf,
            });
        } else {
            log::warn!(
                "checksum mismatch on topic {}: computed {:#06x}, received {:#06x}",
                self.topic_id,
                computed,
                self.expected_checksum
            );
            handler.on_error(ErrorKind::ChecksumMismatch, &self.buf);
        }
        self.state = ReceiveState::WaitingForHeader;
    }

    fn poll_idle<H: PacketHandler>(&mut self, handler: &mut H) {
        let Some(limit) = self.idle_limit else {
            return;
        };
        if self.state == ReceiveState::WaitingForHeader {
            return;
        }
        self.idle_polls += 1;
        if self.idle_polls >= limit {
            log::warn!(
                "abandoning frame after {} idle polls ({} bytes buffered)",
                limit,
                self.buf.len()
            );
            handler.on_error(ErrorKind::IncompletePacket, &self.buf);
            self.state = ReceiveState::WaitingForHeader;
            self.idle_polls = 0;
        }
    }
}

fn send_byte<Tx: Write>(tx: &mut Tx, byte: u8) -> Result<(), SendError<Tx::Error>> {
    nb::block!(tx.write(byte)).map_err(SendError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        packets: Vec<(u16, Vec<u8>)>,
        errors: Vec<ErrorKind>,
        ends: usize,
    }

    impl PacketHandler for Recorder {
        fn on_packet(&mut self, packet: Packet<'_>) {
            self.packets.push((packet.topic_id, packet.payload.to_vec()));
        }

        fn on_error(&mut self, kind: ErrorKind, _partial: &[u8]) {
            self.errors.push(kind);
        }

        fn on_stream_end(&mut self) {
            self.ends += 1;
        }
    }

    fn feed_all<const N: usize>(t: &mut Transceiver<N>, bytes: &[u8], rec: &mut Recorder) {
        for &byte in bytes {
            t.feed(byte, rec);
        }
    }

    // header, checksum, topic 1, length 8, raw payload
    const MOUSE_FRAME: [u8; 15] = [
        0x99, 0x01, 0x6F, 0x00, 0x01, 0x00, 0x08, 0x00, 0x00, 0x00, 0x64, 0x00, 0x05, 0x00, 0x07,
    ];

    #[test]
    fn delivers_known_frame_exactly_once() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        assert_eq!(rec.errors, []);
        assert_eq!(rec.packets.len(), 1);
        let (topic_id, payload) = &rec.packets[0];
        assert_eq!(*topic_id, 1);
        assert_eq!(payload.as_slice(), &MOUSE_FRAME[7..]);
        assert!(!t.mid_frame());
    }

    #[test]
    fn corrupted_checksum_reports_mismatch_and_delivers_nothing() {
        let mut frame = MOUSE_FRAME;
        frame[1] = 0x00;
        frame[2] = 0x00;
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &frame, &mut rec);
        assert_eq!(rec.packets.len(), 0);
        assert_eq!(rec.errors, [ErrorKind::ChecksumMismatch]);
    }

    #[test]
    fn corrupted_payload_byte_reports_mismatch() {
        let mut frame = MOUSE_FRAME;
        frame[10] ^= 0x01;
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &frame, &mut rec);
        assert_eq!(rec.packets.len(), 0);
        assert_eq!(rec.errors, [ErrorKind::ChecksumMismatch]);
    }

    #[test]
    fn back_to_back_frames_deliver_in_order() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        assert_eq!(rec.packets.len(), 2);
        assert_eq!(rec.errors, []);
    }

    #[test]
    fn zero_length_frame_completes_after_length_field() {
        // checksum of the empty payload is the bare seeds
        let frame = [0x99, 0xFF, 0xFF, 0x00, 0x05, 0x00, 0x00];
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &frame, &mut rec);
        assert_eq!(rec.packets, [(5, vec![])]);
        assert_eq!(rec.errors, []);
    }

    #[test]
    fn oversize_declared_length_rejected_before_buffering() {
        let mut t: Transceiver<16> = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &[0x99, 0x00, 0x00, 0x00, 0x01, 0x00, 0x11], &mut rec);
        assert_eq!(rec.errors, [ErrorKind::BufferOverflow]);
        assert!(!t.mid_frame());
        // the next valid frame still goes through
        feed_all(&mut t, &[0x99, 0xFF, 0xFF, 0x00, 0x02, 0x00, 0x00], &mut rec);
        assert_eq!(rec.packets.len(), 1);
    }

    #[test]
    fn garbage_between_frames_reports_and_resynchronizes() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &[0x00, 0x42], &mut rec);
        assert_eq!(rec.errors, [ErrorKind::UnexpectedHeader, ErrorKind::UnexpectedHeader]);
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        assert_eq!(rec.packets.len(), 1);
    }

    #[test]
    fn header_mid_payload_starts_a_new_frame() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        // frame claims 4 payload bytes but a bare header shows up after one
        feed_all(&mut t, &[0x99, 0xAA, 0xBB, 0x00, 0x07, 0x00, 0x04, 0x01], &mut rec);
        // the header byte both aborts the old frame and opens the next, so
        // continue with the known frame minus its leading header
        t.feed(0x99, &mut rec);
        feed_all(&mut t, &MOUSE_FRAME[1..], &mut rec);
        assert_eq!(rec.errors, [ErrorKind::UnexpectedHeader]);
        assert_eq!(rec.packets.len(), 1);
        assert_eq!(rec.packets[0].0, 1);
    }

    #[test]
    fn escaped_payload_bytes_are_stored_literally() {
        let payload = [HEADER, ESCAPE, END];
        let checksum = codec::checksum(&payload);
        let mut frame = vec![0x99];
        frame.extend_from_slice(&checksum.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x02, 0x00, 0x03]);
        frame.extend(codec::escape(&payload));
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &frame, &mut rec);
        assert_eq!(rec.errors, []);
        assert_eq!(rec.packets, [(2, payload.to_vec())]);
    }

    #[test]
    fn escape_before_plain_byte_is_rejected() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        feed_all(&mut t, &[0x99, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, ESCAPE, 0x41], &mut rec);
        assert_eq!(rec.errors, [ErrorKind::InvalidEscape]);
        assert_eq!(rec.packets.len(), 0);
        assert!(!t.mid_frame());
    }

    #[test]
    fn end_marker_between_frames_signals_stream_boundary() {
        let mut t: Transceiver = Transceiver::new();
        let mut rec = Recorder::default();
        t.feed(END, &mut rec);
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        t.feed(END, &mut rec);
        assert_eq!(rec.ends, 2);
        assert_eq!(rec.packets.len(), 1);
        assert_eq!(rec.errors, []);
    }

    #[test]
    fn idle_budget_abandons_partial_frame() {
        struct NoBytes;
        impl embedded_hal_nb::serial::ErrorType for NoBytes {
            type Error = core::convert::Infallible;
        }
        impl Read for NoBytes {
            fn read(&mut self) -> nb::Result<u8, Self::Error> {
                Err(nb::Error::WouldBlock)
            }
        }

        let mut t: Transceiver = Transceiver::with_idle_limit(3);
        let mut rec = Recorder::default();
        feed_all(&mut t, &MOUSE_FRAME[..9], &mut rec);
        assert!(t.mid_frame());
        let mut rx = NoBytes;
        for _ in 0..2 {
            t.update(&mut rx, &mut rec).unwrap();
        }
        assert_eq!(rec.errors, []);
        t.update(&mut rx, &mut rec).unwrap();
        assert_eq!(rec.errors, [ErrorKind::IncompletePacket]);
        assert!(!t.mid_frame());
        // and the session keeps working afterwards
        feed_all(&mut t, &MOUSE_FRAME, &mut rec);
        assert_eq!(rec.packets.len(), 1);
    }

    #[test]
    fn send_writes_the_expected_byte_sequence() {
        struct Sink(Vec<u8>);
        impl embedded_hal_nb::serial::ErrorType for Sink {
            type Error = core::convert::Infallible;
        }
        impl Write for Sink {
            fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
                self.0.push(word);
                Ok(())
            }
            fn flush(&mut self) -> nb::Result<(), Self::Error> {
                Ok(())
            }
        }

        let t: Transceiver = Transceiver::new();
        let mut sink = Sink(Vec::new());
        t.send(&mut sink, 1, &MOUSE_FRAME[7..]).unwrap();
        assert_eq!(sink.0, MOUSE_FRAME);

        sink.0.clear();
        t.send_end(&mut sink).unwrap();
        assert_eq!(sink.0, [END]);
    }

    #[test]
    fn send_rejects_oversize_payload_without_writing() {
        struct FailSink;
        impl embedded_hal_nb::serial::ErrorType for FailSink {
            type Error = core::convert::Infallible;
        }
        impl Write for FailSink {
            fn write(&mut self, _word: u8) -> nb::Result<(), Self::Error> {
                panic!("wrote a byte for an unsendable payload");
            }
            fn flush(&mut self) -> nb::Result<(), Self::Error> {
                Ok(())
            }
        }

        let t: Transceiver<8> = Transceiver::new();
        let result = t.send(&mut FailSink, 1, &[0u8; 9]);
        assert!(matches!(
            result,
            Err(SendError::PayloadTooLarge { len: 9, max: 8 })
        ));
    }

    #[test]
    fn error_kind_wire_bytes_round_trip() {
        for kind in [
            ErrorKind::ChecksumMismatch,
            ErrorKind::IncompletePacket,
            ErrorKind::BufferOverflow,
            ErrorKind::UnexpectedHeader,
            ErrorKind::InvalidEscape,
        ] {
            assert_eq!(ErrorKind::from_wire(kind.to_wire()), Some(kind));
        }
        assert_eq!(ErrorKind::from_wire(0xFF), None);
    }
}
