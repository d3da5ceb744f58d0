//! Escaped, checksummed framing for typed packets over a serial byte stream.
//!
//! Wire format, all multi-byte fields big-endian:
//!
//! ```text
//! [HEADER 0x99][CHECKSUM: 2][TOPIC_ID: 2][LENGTH: 2][payload: LENGTH bytes, escaped]
//! ```
//!
//! Payload bytes colliding with a control value (`0x99`, `0x98`, `0x97`) are
//! byte-stuffed with the `0x98` escape marker. A standalone `0x97` outside a
//! frame marks a stream boundary. The same state machine runs on a host and
//! on a microcontroller; the receive side owns a single fixed-capacity
//! buffer and never blocks.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod codec;
pub mod meta;
pub mod serial;
pub mod topic;
pub mod transceiver;

pub trait Encode {
    type Error;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

pub trait Decode<'a>
where
    Self: Sized,
{
    type Error;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error>;
}

pub use codec::{END, ESCAPE, HEADER, checksum, escape, escaped_len};
pub use topic::{Topic, TopicError, TopicRegistry, unpack};
pub use transceiver::{ErrorKind, MAX_PACKET_SIZE, Packet, PacketHandler, SendError, Transceiver};
