//! Attendance clocks (Entropy Technology, protocol V4.0).
//!
//! | code | message           | body                                                |
//! |------|-------------------|-----------------------------------------------------|
//! | 0x01 | ATTENDANCE_RECORD | userId u32, punchType u8, verifyMethod u8, [punchTime u32] |
//! | 0x02 | DEVICE_STATUS     | statusCode u8                                       |

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

pub const ATTENDANCE_RECORD: u8 = 0x01;
pub const DEVICE_STATUS: u8 = 0x02;

pub const ATTENDANCE_RECORD_PATH: &str = "/api/v1/attendance/record";

const SUPPORTED_MODELS: &[&str] = &["iClock360", "iClock680", "K40", "UFace800", "SpeedFace-V5L"];

pub struct AttendanceAdapter {
    client: Arc<dyn BusinessServiceClient>,
}

impl AttendanceAdapter {
    pub fn new(client: Arc<dyn BusinessServiceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProtocolAdapter for AttendanceAdapter {
    fn identify(&self) -> AdapterIdentity {
        AdapterIdentity {
            protocol_type: PROTOCOL_ATTENDANCE.to_string(),
            manufacturer: "Entropy Technology".to_string(),
            version: "V4.0".to_string(),
        }
    }

    fn supported_device_models(&self) -> &[&'static str] {
        SUPPORTED_MODELS
    }

    fn min_frame_len(&self) -> usize {
        ATTENDANCE_MIN_FRAME_LEN
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, ParseError> {
        let frame = Frame::parse(bytes, ATTENDANCE_MIN_FRAME_LEN)?;
        let code = frame.message_type_code();
        let name = match code {
            ATTENDANCE_RECORD => MSG_ATTENDANCE_RECORD.to_string(),
            DEVICE_STATUS => MSG_DEVICE_STATUS.to_string(),
            other => unknown_type_name(other),
        };
        let mut message = ParsedMessage::from_frame(PROTOCOL_ATTENDANCE, &frame, name);
        let mut body = frame.body_reader();

        match code {
            ATTENDANCE_RECORD => {
                let user_id = body.read_u32()?;
                let punch_type = body.read_u8()?;
                let verify = body.read_u8()?;
                message.insert("userId", user_id);
                message.insert("punchType", punch_type);
                message.insert(
                    "punchDirection",
                    if punch_type == 0 { "CHECK_IN" } else { "CHECK_OUT" },
                );
                message.insert("verifyMethod", verify);
                message.insert("verifyMethodName", VerifyMethod::from_code(verify).as_str());
                if let Some(punch_time) = body.read_optional_u32() {
                    message.insert("punchTime", punch_time);
                }
            }
            DEVICE_STATUS => {
                let status = body.read_u8()?;
                message.insert("statusCode", status);
                message.insert("deviceStatus", DeviceStatus::from_code(status).as_str());
            }
            _ => {}
        }

        debug!(
            device_code = message.device_code().unwrap_or_default(),
            message_type = message.message_type().unwrap_or_default(),
            "parsed attendance frame"
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
            Some(MSG_ATTENDANCE_RECORD) => {
                payload.insert(
                    "punchTime".into(),
                    event_time(message, "punchTime", ctx).into(),
                );
                BusinessRequest::post(ATTENDANCE_RECORD_PATH, Value::Object(payload))
            }
            Some(MSG_DEVICE_STATUS) => {
                BusinessRequest::post(DEVICE_STATUS_PATH, Value::Object(payload))
            }
            _ => return Err(unknown_message(message)),
        };
        send(self.client.as_ref(), request).await
    }
}
