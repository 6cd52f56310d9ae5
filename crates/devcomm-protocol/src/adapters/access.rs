//! Door-access controllers (Entropy Technology, protocol V4.8).
//!
//! | code | message        | body                                                    |
//! |------|----------------|---------------------------------------------------------|
//! | 0x01 | ACCESS_RECORD  | userId u32, passType u8, doorNo u8, verifyMethod u8, [passTime u32] |
//! | 0x02 | DEVICE_STATUS  | statusCode u8, doorState u8                             |
//! | 0x03 | ALARM_EVENT    | alarmType u8, alarmLevel u8, doorNo u8                  |

use super::{DEVICE_STATUS_PATH, base_payload, event_time, send, unknown_message, unknown_type_name};
use crate::adapter::{AdapterIdentity, ProtocolAdapter};
use crate::frame::Frame;
use crate::message::ParsedMessage;
use crate::service::{BusinessRequest, BusinessServiceClient, ProcessContext};
use async_trait::async_trait;
use devcomm_core::constants::*;
use devcomm_core::{DeviceStatus, ParseError, ProcessError, ProcessResult, VerifyMethod};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const ACCESS_RECORD: u8 = 0x01;
pub const DEVICE_STATUS: u8 = 0x02;
pub const ALARM_EVENT: u8 = 0x03;

pub const ACCESS_RECORD_PATH: &str = "/api/v1/access/record";
pub const ALARM_EVENT_PATH: &str = "/api/v1/access/alarm";

const SUPPORTED_MODELS: &[&str] = &[
    "MA300", "MA300T", "SC405", "SC700", "SC705", "F18", "TA800C", "TA800T", "WK2600", "WK2600P",
];

pub struct AccessAdapter {
    client: Arc<dyn BusinessServiceClient>,
}

impl AccessAdapter {
    pub fn new(client: Arc<dyn BusinessServiceClient>) -> Self {
        Self { client }
    }

    fn message_type_name(code: u8) -> String {
        match code {
            ACCESS_RECORD => MSG_ACCESS_RECORD.to_string(),
            DEVICE_STATUS => MSG_DEVICE_STATUS.to_string(),
            ALARM_EVENT => MSG_ALARM_EVENT.to_string(),
            other => unknown_type_name(other),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for AccessAdapter {
    fn identify(&self) -> AdapterIdentity {
        AdapterIdentity {
            protocol_type: PROTOCOL_ACCESS.to_string(),
            manufacturer: "Entropy Technology".to_string(),
            version: "V4.8".to_string(),
        }
    }

    fn supported_device_models(&self) -> &[&'static str] {
        SUPPORTED_MODELS
    }

    fn min_frame_len(&self) -> usize {
        ACCESS_MIN_FRAME_LEN
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, ParseError> {
        let frame = Frame::parse(bytes, ACCESS_MIN_FRAME_LEN)?;
        let code = frame.message_type_code();
        let mut message =
            ParsedMessage::from_frame(PROTOCOL_ACCESS, &frame, Self::message_type_name(code));
        let mut body = frame.body_reader();

        match code {
            ACCESS_RECORD => {
                let user_id = body.read_u32()?;
                let pass_type = body.read_u8()?;
                let door_no = body.read_u8()?;
                let verify = body.read_u8()?;
                message.insert("userId", user_id);
                message.insert("passType", pass_type);
                message.insert(
                    "passDirection",
                    if pass_type == 0 { "ENTRY" } else { "EXIT" },
                );
                message.insert("doorNo", door_no);
                message.insert("verifyMethod", verify);
                message.insert("verifyMethodName", VerifyMethod::from_code(verify).as_str());
                if let Some(pass_time) = body.read_optional_u32() {
                    message.insert("passTime", pass_time);
                }
            }
            DEVICE_STATUS => {
                let status = body.read_u8()?;
                let door_state = body.read_u8()?;
                message.insert("statusCode", status);
                message.insert("deviceStatus", DeviceStatus::from_code(status).as_str());
                message.insert("doorState", door_state);
                message.insert("doorOpen", door_state == 1);
            }
            ALARM_EVENT => {
                message.insert("alarmType", body.read_u8()?);
                message.insert("alarmLevel", body.read_u8()?);
                message.insert("doorNo", body.read_u8()?);
            }
            _ => {}
        }

        debug!(
            device_code = message.device_code().unwrap_or_default(),
            message_type = message.message_type().unwrap_or_default(),
            seq = message.sequence_number,
            "parsed access frame"
        );
        Ok(message)
    }

    async fn handle(
        &self,
        message: &ParsedMessage,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult, ProcessError> {
        let mut payload = base_payload(message, ctx);
        let request = match message.message_type() {
            Some(MSG_ACCESS_RECORD) => {
                payload.insert(
                    "passTime".into(),
                    event_time(message, "passTime", ctx).into(),
                );
                BusinessRequest::post(ACCESS_RECORD_PATH, Value::Object(payload))
            }
            Some(MSG_DEVICE_STATUS) => {
                BusinessRequest::post(DEVICE_STATUS_PATH, Value::Object(payload))
            }
            Some(MSG_ALARM_EVENT) => {
                payload.insert("alarmTime".into(), ctx.now.to_rfc3339().into());
                BusinessRequest::post(ALARM_EVENT_PATH, Value::Object(payload))
            }
            _ => return Err(unknown_message(message)),
        };
        send(self.client.as_ref(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingClient;
    use crate::frame::FrameBuilder;
    use crate::service::{ServiceError, ServiceResponse};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn record_frame(pass_time: Option<u32>) -> bytes::Bytes {
        let builder = FrameBuilder::new(ACCESS_RECORD, "DEV001", 100)
            .u32(1001)
            .u8(0)
            .u8(1)
            .u8(1);
        match pass_time {
            Some(t) => builder.u32(t).build(),
            None => builder.build(),
        }
    }

    fn ctx() -> ProcessContext {
        ProcessContext::new(
            "msg-1",
            "door-1".parse().unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap(),
        )
    }

    fn adapter(client: Arc<RecordingClient>) -> AccessAdapter {
        AccessAdapter::new(client)
    }

    #[test]
    fn test_identify() {
        let identity = adapter(Arc::new(RecordingClient::ok())).identify();
        assert_eq!(identity.protocol_type, "ACCESS_ENTROPY_V4_8");
        assert_eq!(identity.manufacturer, "Entropy Technology");
        assert_eq!(identity.version, "V4.8");
    }

    #[test]
    fn test_parse_access_record() {
        let a = adapter(Arc::new(RecordingClient::ok()));
        let bytes = record_frame(None);
        assert_eq!(bytes.len(), ACCESS_MIN_FRAME_LEN);

        let msg = a.parse(&bytes).unwrap();
        assert_eq!(msg.protocol_type, PROTOCOL_ACCESS);
        assert_eq!(msg.message_type(), Some(MSG_ACCESS_RECORD));
        assert_eq!(msg.device_code(), Some("DEV001"));
        assert_eq!(msg.field_u64("userId"), Some(1001));
        assert_eq!(msg.field_u64("passType"), Some(0));
        assert_eq!(msg.field("passDirection"), Some(&Value::from("ENTRY")));
        assert_eq!(msg.field_u64("doorNo"), Some(1));
        assert_eq!(msg.field("verifyMethodName"), Some(&Value::from("FINGERPRINT")));
        assert!(msg.field("passTime").is_none());
    }

    #[test]
    fn test_parse_access_record_with_time() {
        let a = adapter(Arc::new(RecordingClient::ok()));
        let msg = a.parse(&record_frame(Some(1_700_000_000))).unwrap();
        assert_eq!(msg.field_u64("passTime"), Some(1_700_000_000));
    }

    #[test]
    fn test_parse_device_status() {
        let a = adapter(Arc::new(RecordingClient::ok()));
        let bytes = FrameBuilder::new(DEVICE_STATUS, "DEV001", 1)
            .u8(2)
            .u8(1)
            .min_len(ACCESS_MIN_FRAME_LEN)
            .build();
        let msg = a.parse(&bytes).unwrap();
        assert_eq!(msg.message_type(), Some(MSG_DEVICE_STATUS));
        assert_eq!(msg.field("deviceStatus"), Some(&Value::from("MAINTAIN")));
        assert_eq!(msg.field("doorOpen"), Some(&Value::from(true)));
    }

    #[test]
    fn test_parse_unknown_type_keeps_code() {
        let a = adapter(Arc::new(RecordingClient::ok()));
        let bytes = FrameBuilder::new(0x7E, "DEV001", 1)
            .min_len(ACCESS_MIN_FRAME_LEN)
            .build();
        let msg = a.parse(&bytes).unwrap();
        assert_eq!(msg.message_type(), Some("UNKNOWN_0x7E"));
        assert_eq!(msg.message_type_code, 0x7E);
    }

    #[rstest]
    #[case(&[], ParseError::NullInput)]
    #[case(&[0xAA, 0x55, 0x01], ParseError::TooShort { required: 24, actual: 3 })]
    fn test_parse_rejects(#[case] bytes: &[u8], #[case] expected: ParseError) {
        let a = adapter(Arc::new(RecordingClient::ok()));
        assert_eq!(a.parse(bytes).unwrap_err(), expected);
    }

    #[tokio::test]
    async fn test_process_access_record() {
        let client = Arc::new(RecordingClient::ok());
        let a = adapter(client.clone());
        let mut msg = a.parse(&record_frame(None)).unwrap();
        assert!(a.validate(Some(&mut msg)));

        let result = a.process(&msg, &ctx()).await.unwrap();
        assert_eq!(result, ProcessResult::Success);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action_path, ACCESS_RECORD_PATH);
        let payload = &requests[0].payload;
        assert_eq!(payload["userId"], 1001);
        assert_eq!(payload["deviceId"], "door-1");
        assert_eq!(payload["messageId"], "msg-1");
        assert_eq!(payload["sequenceNumber"], 100);
        assert_eq!(payload["passTime"], "2025-10-01T08:00:00+00:00");
    }

    #[tokio::test]
    async fn test_process_alarm_event() {
        let client = Arc::new(RecordingClient::ok());
        let a = adapter(client.clone());
        let bytes = FrameBuilder::new(ALARM_EVENT, "DEV001", 5)
            .u8(3)
            .u8(2)
            .u8(1)
            .min_len(ACCESS_MIN_FRAME_LEN)
            .build();
        let mut msg = a.parse(&bytes).unwrap();
        assert!(a.validate(Some(&mut msg)));
        a.process(&msg, &ctx()).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests[0].action_path, ALARM_EVENT_PATH);
        assert_eq!(requests[0].payload["alarmLevel"], 2);
    }

    #[tokio::test]
    async fn test_process_unknown_type() {
        let client = Arc::new(RecordingClient::ok());
        let a = adapter(client.clone());
        let bytes = FrameBuilder::new(0x09, "DEV001", 1)
            .min_len(ACCESS_MIN_FRAME_LEN)
            .build();
        let mut msg = a.parse(&bytes).unwrap();
        assert!(a.validate(Some(&mut msg)));

        let err = a.process(&msg, &ctx()).await.unwrap_err();
        assert_eq!(err, ProcessError::UnknownMessageType("UNKNOWN_0x09".into()));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_process_maps_service_failures() {
        let client = Arc::new(RecordingClient::answering(Err(ServiceError::Timeout(
            ACCESS_RECORD_PATH.into(),
        ))));
        let a = adapter(client);
        let mut msg = a.parse(&record_frame(None)).unwrap();
        a.validate(Some(&mut msg));
        assert!(matches!(
            a.process(&msg, &ctx()).await,
            Err(ProcessError::DownstreamTimeout(_))
        ));

        let client = Arc::new(RecordingClient::answering(Ok(ServiceResponse::failed(
            Value::from("user disabled"),
        ))));
        let a = adapter(client);
        assert!(matches!(
            a.process(&msg, &ctx()).await,
            Err(ProcessError::DownstreamRejected(_))
        ));
    }
}
