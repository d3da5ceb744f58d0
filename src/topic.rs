//! The topic contract: numeric ids bound to fixed-size payload layouts.
//!
//! Fields are encoded explicitly, big-endian, through [`FieldWriter`] and
//! [`FieldReader`]; payload bytes are never reinterpreted as in-memory
//! struct layout, so both peers agree on the wire bytes regardless of
//! padding or native byte order.

use crate::transceiver::Packet;
use crate::{Decode, Encode};

/// Errors from packing or unpacking a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    TopicMismatch { expected: u16, found: u16 },
    SizeMismatch { expected: usize, found: usize },
    BufferTooSmall { expected: usize, found: usize },
    InvalidValue { field: &'static str },
}

/// A fixed-layout payload with an intrinsic topic id.
///
/// `SIZE` is the exact encoded byte size; [`Encode::encode`] and
/// [`Decode::decode`] are handed buffers of exactly that length.
pub trait Topic: Encode<Error = TopicError> + for<'a> Decode<'a, Error = TopicError> {
    const TOPIC_ID: u16;
    const SIZE: usize;
}

/// Strict unpack: the topic id and the exact byte size must both match
/// before any field is decoded. Mismatched payloads are never partially
/// applied; on failure no value exists at all.
pub fn unpack<T: Topic>(topic_id: u16, payload: &[u8]) -> Result<T, TopicError> {
    if topic_id != T::TOPIC_ID {
        return Err(TopicError::TopicMismatch {
            expected: T::TOPIC_ID,
            found: topic_id,
        });
    }
    if payload.len() != T::SIZE {
        return Err(TopicError::SizeMismatch {
            expected: T::SIZE,
            found: payload.len(),
        });
    }
    T::decode(payload)
}

/// Bounds-checked big-endian cursor for implementing [`Encode`] on topics.
#[derive(Debug)]
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        FieldWriter { buf, pos: 0 }
    }

    fn take(&mut self, amount: usize) -> Result<&mut [u8], TopicError> {
        let end = self.pos + amount;
        if end > self.buf.len() {
            return Err(TopicError::BufferTooSmall {
                expected: end,
                found: self.buf.len(),
            });
        }
        let field = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(field)
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), TopicError> {
        self.take(1)?[0] = value;
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), TopicError> {
        self.put_u8(value as u8)
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), TopicError> {
        self.take(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), TopicError> {
        self.take(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), TopicError> {
        self.take(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_f32(&mut self, value: f32) -> Result<(), TopicError> {
        self.take(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> Result<(), TopicError> {
        self.take(value.len())?.copy_from_slice(value);
        Ok(())
    }

    /// Write `text` into a fixed `LEN`-byte field, zero-padded, truncated
    /// at the last char boundary that fits.
    pub fn put_text<const LEN: usize>(&mut self, text: &str) -> Result<(), TopicError> {
        let field = self.take(LEN)?;
        let mut len = text.len().min(LEN);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        field[..len].copy_from_slice(&text.as_bytes()[..len]);
        field[len..].fill(0);
        Ok(())
    }

    /// Consume the writer, checking that the buffer was filled exactly.
    pub fn finish(self) -> Result<(), TopicError> {
        if self.pos != self.buf.len() {
            return Err(TopicError::SizeMismatch {
                expected: self.buf.len(),
                found: self.pos,
            });
        }
        Ok(())
    }
}

/// Counterpart of [`FieldWriter`] for implementing [`Decode`].
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        FieldReader { buf, pos: 0 }
    }

    fn take(&mut self, amount: usize) -> Result<&'a [u8], TopicError> {
        let end = self.pos + amount;
        if end > self.buf.len() {
            return Err(TopicError::BufferTooSmall {
                expected: end,
                found: self.buf.len(),
            });
        }
        let field = &self.buf[self.pos..end];
        self.pos = end;
        Ok(field)
    }

    pub fn take_u8(&mut self) -> Result<u8, TopicError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_bool(&mut self) -> Result<bool, TopicError> {
        match self.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(TopicError::InvalidValue { field: "bool" }),
        }
    }

    pub fn take_u16(&mut self) -> Result<u16, TopicError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn take_u32(&mut self) -> Result<u32, TopicError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_i32(&mut self) -> Result<i32, TopicError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_f32(&mut self) -> Result<f32, TopicError> {
        let bytes = self.take(4)?;
        Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_bytes(&mut self, amount: usize) -> Result<&'a [u8], TopicError> {
        self.take(amount)
    }

    /// Read a fixed `LEN`-byte text field: bytes up to the first NUL,
    /// validated as UTF-8.
    pub fn take_text<const LEN: usize>(&mut self) -> Result<heapless::String<LEN>, TopicError> {
        let field = self.take(LEN)?;
        let end = field.iter().position(|&b| b == 0).unwrap_or(LEN);
        let text = core::str::from_utf8(&field[..end])
            .map_err(|_| TopicError::InvalidValue { field: "text" })?;
        let mut out = heapless::String::new();
        out.push_str(text)
            .map_err(|_| TopicError::InvalidValue { field: "text" })?;
        Ok(out)
    }

    /// Consume the reader, checking that no bytes were left over.
    pub fn finish(self) -> Result<(), TopicError> {
        if self.pos != self.buf.len() {
            return Err(TopicError::SizeMismatch {
                expected: self.buf.len(),
                found: self.pos,
            });
        }
        Ok(())
    }
}

/// Handler signature stored in a [`TopicRegistry`]. Receives the raw
/// payload after the registry has verified its size.
pub type TopicFn<Ctx> = fn(&mut Ctx, &[u8]) -> Result<(), TopicError>;

struct Entry<Ctx> {
    topic_id: u16,
    size: usize,
    handler: TopicFn<Ctx>,
}

/// Errors from registering or dispatching topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    DuplicateTopic { topic_id: u16 },
    TableFull { capacity: usize },
    UnknownTopic { topic_id: u16 },
    Topic(TopicError),
}

impl From<TopicError> for DispatchError {
    fn from(value: TopicError) -> Self {
        DispatchError::Topic(value)
    }
}

/// Dispatch table mapping topic ids to handlers.
///
/// Id uniqueness is enforced at registration, not at dispatch; the
/// transceiver itself never inspects topic ids.
pub struct TopicRegistry<Ctx, const CAP: usize> {
    entries: heapless::Vec<Entry<Ctx>, CAP>,
}

impl<Ctx, const CAP: usize> Default for TopicRegistry<Ctx, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx, const CAP: usize> TopicRegistry<Ctx, CAP> {
    pub fn new() -> Self {
        TopicRegistry {
            entries: heapless::Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind `T`'s topic id to `handler`. Rejects a second registration of
    /// the same id.
    pub fn register<T: Topic>(&mut self, handler: TopicFn<Ctx>) -> Result<(), DispatchError> {
        if self.entries.iter().any(|e| e.topic_id == T::TOPIC_ID) {
            return Err(DispatchError::DuplicateTopic {
                topic_id: T::TOPIC_ID,
            });
        }
        self.entries
            .push(Entry {
                topic_id: T::TOPIC_ID,
                size: T::SIZE,
                handler,
            })
            .map_err(|_| DispatchError::TableFull { capacity: CAP })
    }

    /// Route a received packet to the registered handler, checking the
    /// payload size against the topic's declared size first.
    pub fn dispatch(&self, ctx: &mut Ctx, packet: Packet<'_>) -> Result<(), DispatchError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.topic_id == packet.topic_id)
            .ok_or(DispatchError::UnknownTopic {
                topic_id: packet.topic_id,
            })?;
        if packet.payload.len() != entry.size {
            return Err(DispatchError::Topic(TopicError::SizeMismatch {
                expected: entry.size,
                found: packet.payload.len(),
            }));
        }
        (entry.handler)(ctx, packet.payload).map_err(DispatchError::Topic)
    }
}
