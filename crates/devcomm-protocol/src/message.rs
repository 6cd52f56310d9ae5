use crate::frame::Frame;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Decoding progress of a [`ParsedMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseStatus {
    Parsed,
    Validated,
}

/// Decoded terminal message
///
/// Produced by an adapter's `parse`, then handed to `validate` and
/// `process` within the same attempt. Never persisted directly; the
/// business fields end up in the record's `business_data`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub protocol_type: String,
    pub message_type: Option<String>,
    pub message_type_code: u8,
    pub device_code: Option<String>,
    pub sequence_number: u32,
    pub checksum: u16,
    pub data: BTreeMap<String, Value>,
    pub status: ParseStatus,
    #[serde(skip)]
    raw: Bytes,
}

impl ParsedMessage {
    /// Start a message from a verified frame; body fields are added by the
    /// adapter afterwards.
    pub fn from_frame(
        protocol_type: &str,
        frame: &Frame,
        message_type: impl Into<String>,
    ) -> Self {
        ParsedMessage {
            protocol_type: protocol_type.to_string(),
            message_type: Some(message_type.into()),
            message_type_code: frame.message_type_code(),
            device_code: frame.device_code(),
            sequence_number: frame.sequence_number(),
            checksum: frame.checksum(),
            data: BTreeMap::new(),
            status: ParseStatus::Parsed,
            raw: Bytes::copy_from_slice(frame.as_bytes()),
        }
    }

    /// Set a business field.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Get a business field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a numeric business field.
    pub fn field_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn device_code(&self) -> Option<&str> {
        self.device_code.as_deref()
    }

    pub fn is_validated(&self) -> bool {
        self.status == ParseStatus::Validated
    }

    /// Raw frame bytes the message was decoded from.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Business fields as a JSON object.
    pub fn data_json(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;

    #[test]
    fn test_from_frame_copies_envelope() {
        let bytes = FrameBuilder::new(0x02, "DEV9", 11).u8(1).min_len(24).build();
        let frame = Frame::parse(&bytes, 24).unwrap();

        let mut msg = ParsedMessage::from_frame("P", &frame, "DEVICE_STATUS");
        msg.insert("statusCode", 1u8);

        assert_eq!(msg.protocol_type, "P");
        assert_eq!(msg.message_type(), Some("DEVICE_STATUS"));
        assert_eq!(msg.message_type_code, 0x02);
        assert_eq!(msg.device_code(), Some("DEV9"));
        assert_eq!(msg.sequence_number, 11);
        assert_eq!(msg.checksum, frame.checksum());
        assert_eq!(msg.status, ParseStatus::Parsed);
        assert!(!msg.is_validated());
        assert_eq!(msg.field_u64("statusCode"), Some(1));
        assert_eq!(msg.raw().as_ref(), &bytes[..]);
        assert_eq!(msg.data_json()["statusCode"], 1);
    }
}
