//! Reserved protocol topics.
//!
//! Ids `0..=240` belong to the application; `241..=255` carry
//! protocol-level exchanges: device identification, device-id assignment,
//! and error reporting. Both peers may implement any subset.

use heapless::String;

use crate::topic::{FieldReader, FieldWriter, Topic, TopicError};
use crate::transceiver::ErrorKind;
use crate::{Decode, Encode};

/// Largest topic id available to applications.
pub const APP_TOPIC_MAX: u16 = 240;

/// Whether `topic_id` falls in the protocol-reserved range.
pub const fn is_reserved_topic(topic_id: u16) -> bool {
    topic_id > APP_TOPIC_MAX && topic_id <= 0xFF
}

pub const NAME_LEN: usize = 32;
pub const VERSION_LEN: usize = 32;
pub const MESSAGE_LEN: usize = 32;

/// Asks the peer to identify itself. Empty payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfoRequest;

impl Encode for DeviceInfoRequest {
    type Error = TopicError;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), TopicError> {
        FieldWriter::new(buffer).finish()
    }
}

impl Decode<'_> for DeviceInfoRequest {
    type Error = TopicError;

    fn decode(data: &[u8]) -> Result<Self, TopicError> {
        FieldReader::new(data).finish()?;
        Ok(DeviceInfoRequest)
    }
}

impl Topic for DeviceInfoRequest {
    const TOPIC_ID: u16 = 255;
    const SIZE: usize = 0;
}

/// Answer to [`DeviceInfoRequest`]: who the peer is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfoResponse {
    pub device_name: String<NAME_LEN>,
    pub version: String<VERSION_LEN>,
    pub device_id: u16,
}

impl Encode for DeviceInfoResponse {
    type Error = TopicError;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), TopicError> {
        let mut w = FieldWriter::new(buffer);
        w.put_text::<NAME_LEN>(&self.device_name)?;
        w.put_text::<VERSION_LEN>(&self.version)?;
        w.put_u16(self.device_id)?;
        w.finish()
    }
}

impl Decode<'_> for DeviceInfoResponse {
    type Error = TopicError;

    fn decode(data: &[u8]) -> Result<Self, TopicError> {
        let mut r = FieldReader::new(data);
        let response = DeviceInfoResponse {
            device_name: r.take_text::<NAME_LEN>()?,
            version: r.take_text::<VERSION_LEN>()?,
            device_id: r.take_u16()?,
        };
        r.finish()?;
        Ok(response)
    }
}

impl Topic for DeviceInfoResponse {
    const TOPIC_ID: u16 = 254;
    const SIZE: usize = NAME_LEN + VERSION_LEN + 2;
}

/// Assign a new numeric id to the peer device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetDeviceIdRequest {
    pub device_id: u16,
}

impl Encode for SetDeviceIdRequest {
    type Error = TopicError;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), TopicError> {
        let mut w = FieldWriter::new(buffer);
        w.put_u16(self.device_id)?;
        w.finish()
    }
}

impl Decode<'_> for SetDeviceIdRequest {
    type Error = TopicError;

    fn decode(data: &[u8]) -> Result<Self, TopicError> {
        let mut r = FieldReader::new(data);
        let request = SetDeviceIdRequest {
            device_id: r.take_u16()?,
        };
        r.finish()?;
        Ok(request)
    }
}

impl Topic for SetDeviceIdRequest {
    const TOPIC_ID: u16 = 253;
    const SIZE: usize = 2;
}

/// Outcome of a [`SetDeviceIdRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetDeviceIdResponse {
    pub device_id: u16,
    pub succeeded: bool,
}

impl Encode for SetDeviceIdResponse {
    type Error = TopicError;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), TopicError> {
        let mut w = FieldWriter::new(buffer);
        w.put_u16(self.device_id)?;
        w.put_bool(self.succeeded)?;
        w.finish()
    }
}

impl Decode<'_> for SetDeviceIdResponse {
    type Error = TopicError;

    fn decode(data: &[u8]) -> Result<Self, TopicError> {
        let mut r = FieldReader::new(data);
        let response = SetDeviceIdResponse {
            device_id: r.take_u16()?,
            succeeded: r.take_bool()?,
        };
        r.finish()?;
        Ok(response)
    }
}

impl Topic for SetDeviceIdResponse {
    const TOPIC_ID: u16 = 252;
    const SIZE: usize = 3;
}

/// Forwards a locally observed protocol error to the peer, e.g. so a host
/// can log what its firmware counterpart rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub timestamp: u32,
    pub message: String<MESSAGE_LEN>,
    pub kind: ErrorKind,
}

impl Encode for ErrorReport {
    type Error = TopicError;

    fn encode(&self, buffer: &mut [u8]) -> Result<(), TopicError> {
        let mut w = FieldWriter::new(buffer);
        w.put_u32(self.timestamp)?;
        w.put_text::<MESSAGE_LEN>(&self.message)?;
        w.put_u8(self.kind.to_wire())?;
        w.finish()
    }
}

impl Decode<'_> for ErrorReport {
    type Error = TopicError;

    fn decode(data: &[u8]) -> Result<Self, TopicError> {
        let mut r = FieldReader::new(data);
        let timestamp = r.take_u32()?;
        let message = r.take_text::<MESSAGE_LEN>()?;
        let kind = ErrorKind::from_wire(r.take_u8()?)
            .ok_or(TopicError::InvalidValue { field: "kind" })?;
        r.finish()?;
        Ok(ErrorReport {
            timestamp,
            message,
            kind,
        })
    }
}

impl Topic for ErrorReport {
    const TOPIC_ID: u16 = 251;
    const SIZE: usize = 4 + MESSAGE_LEN + 1;
}
