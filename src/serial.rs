//! Buffered bindings between a raw serial port and the transceiver.
//!
//! [`crate::Transceiver::update`] drains whatever bytes are pending and
//! must never block; these adapters queue bytes on both sides of an
//! `embedded-hal-nb` port so a poll always runs to completion even when
//! the port delivers or accepts one byte at a time.

extern crate alloc;

use alloc::collections::VecDeque;
use embedded_hal_nb::serial::{Error, ErrorType, Read, Write};

/// Pulls bytes out of `Rx` eagerly so the state machine can consume them
/// one at a time later.
#[derive(Debug)]
pub struct BufferedRx<Rx: Read> {
    rx: Rx,
    buf: VecDeque<u8>,
}

impl<Rx: Read> BufferedRx<Rx> {
    pub fn new(rx: Rx) -> Self {
        BufferedRx {
            rx,
            buf: VecDeque::new(),
        }
    }

    /// Bytes ready without touching the port.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    /// Drain the port into the queue until it would block.
    pub fn fill(&mut self) -> Result<(), Rx::Error> {
        loop {
            match self.rx.read() {
                Ok(byte) => self.buf.push_back(byte),
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    pub fn into_inner(self) -> Rx {
        self.rx
    }
}

impl<Rx: Read> ErrorType for BufferedRx<Rx> {
    type Error = Rx::Error;
}

impl<Rx: Read> Read for BufferedRx<Rx> {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if let Some(byte) = self.buf.pop_front() {
            return Ok(byte);
        }
        self.rx.read()
    }
}

/// Queues outgoing bytes so a whole frame can be handed off even when the
/// port only accepts a byte at a time.
#[derive(Debug)]
pub struct BufferedTx<Tx: Write> {
    tx: Tx,
    buf: VecDeque<u8>,
}

impl<Tx: Write> BufferedTx<Tx> {
    pub fn new(tx: Tx) -> Self {
        BufferedTx {
            tx,
            buf: VecDeque::new(),
        }
    }

    /// Bytes queued but not yet on the wire.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Push queued bytes into the port until it would block or the queue
    /// empties, then flush the port itself.
    pub fn drain(&mut self) -> nb::Result<(), Tx::Error> {
        while let Some(&byte) = self.buf.front() {
            self.tx.write(byte)?;
            self.buf.pop_front();
        }
        self.tx.flush()
    }

    pub fn into_inner(self) -> Tx {
        self.tx
    }
}

impl<Tx: Write> ErrorType for BufferedTx<Tx> {
    type Error = Tx::Error;
}

impl<Tx: Write> Write for BufferedTx<Tx> {
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.buf.push_back(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.drain()
    }
}

/// Maps serial error kinds onto `embedded-io` ones so [`BufferedTx`] can
/// serve `embedded_io::Write` consumers.
#[derive(Debug, PartialEq, Eq)]
pub struct ErrorShim<E: Error>(pub E);

impl<E: Error> embedded_io::Error for ErrorShim<E> {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind::*;
        match self.0.kind() {
            Overrun => embedded_io::ErrorKind::OutOfMemory,
            FrameFormat | Parity => embedded_io::ErrorKind::InvalidData,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl<E: Error> From<E> for ErrorShim<E> {
    fn from(value: E) -> Self {
        ErrorShim(value)
    }
}

impl<Tx: Write> embedded_io::ErrorType for BufferedTx<Tx> {
    type Error = ErrorShim<Tx::Error>;
}

impl<Tx: Write> embedded_io::Write for BufferedTx<Tx> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.buf.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match self.drain() {
            Ok(()) => Ok(()),
            Err(nb::Error::WouldBlock) => Ok(()),
            Err(nb::Error::Other(e)) => Err(ErrorShim(e)),
        }
    }
}
