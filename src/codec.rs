//! Stateless framing primitives: the payload checksum and byte stuffing.
//!
//! Nothing here does I/O or holds state; the receive state machine in
//! [`crate::transceiver`] performs the matching unescape inline as bytes
//! arrive.

/// Marks the start of every frame.
pub const HEADER: u8 = 0x99;
/// Emitted before any payload byte that collides with a control value.
pub const ESCAPE: u8 = 0x98;
/// Standalone stream-boundary marker, never part of a frame.
pub const END: u8 = 0x97;

/// Whether `byte` is one of the reserved control values.
pub const fn is_reserved(byte: u8) -> bool {
    matches!(byte, HEADER | ESCAPE | END)
}

/// Fletcher-style rolling checksum over raw (unescaped) payload bytes.
///
/// Both accumulators are seeded to `0xFF` so an all-zero buffer does not
/// produce an all-zero checksum; the second accumulator makes the sum
/// sensitive to byte reordering. The empty buffer yields `0xFFFF`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum1: u8 = 0xff;
    let mut sum2: u8 = 0xff;
    for &byte in data {
        sum1 = sum1.wrapping_add(byte);
        sum2 = sum2.wrapping_add(sum1);
    }
    ((sum2 as u16) << 8) | sum1 as u16
}

/// Number of bytes `data` occupies on the wire once escaped.
pub fn escaped_len(data: &[u8]) -> usize {
    data.len() + data.iter().filter(|&&byte| is_reserved(byte)).count()
}

/// Byte-stuffs `data` for transmission: every reserved byte is preceded by
/// [`ESCAPE`] and passed through otherwise unchanged.
///
/// Streaming so the send path never buffers the escaped frame.
pub fn escape(data: &[u8]) -> Escaped<'_> {
    Escaped {
        data,
        pending: None,
    }
}

/// Iterator returned by [`escape`].
#[derive(Debug, Clone)]
pub struct Escaped<'a> {
    data: &'a [u8],
    pending: Option<u8>,
}

impl Iterator for Escaped<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.take() {
            return Some(byte);
        }
        let (&byte, rest) = self.data.split_first()?;
        self.data = rest;
        if is_reserved(byte) {
            self.pending = Some(byte);
            Some(ESCAPE)
        } else {
            Some(byte)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = escaped_len(self.data) + usize::from(self.pending.is_some());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Escaped<'_> {}
