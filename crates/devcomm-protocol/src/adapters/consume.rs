//! Consumption / POS terminals (ZKTeco, protocol V1.0).
//!
//! | code | message        | body                                                              |
//! |------|----------------|-------------------------------------------------------------------|
//! | 0x01 | CONSUME_RECORD | cardNo u32, amount u32, balance u32, mealType u8, consumeType u8 |
//! | 0x02 | DEVICE_STATUS  | statusCode u8, onlineStatus u8                                    |
//! | 0x03 | BALANCE_QUERY  | cardNo u32                                                        |
//!
//! Amounts are in cents.

use super::{DEVICE_STATUS_PATH, base_payload, send, unknown_message, unknown_type_name};
use crate::adapter::{AdapterIdentity, ProtocolAdapter};
use crate::frame::Frame;
use crate::message::ParsedMessage;
use crate::service::{BusinessRequest, BusinessServiceClient, ProcessContext};
use async_trait::async_trait;
use devcomm_core::constants::*;
use devcomm_core::{DeviceStatus, ParseError, ProcessError, ProcessResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const CONSUME_RECORD: u8 = 0x01;
pub const DEVICE_STATUS: u8 = 0x02;
pub const BALANCE_QUERY: u8 = 0x03;

pub const CONSUME_RECORD_PATH: &str = "/api/v1/consume/record";
pub const BALANCE_QUERY_PATH: &str = "/api/v1/consume/account/balance/card";

const SUPPORTED_MODELS: &[&str] = &["CM20", "CM30", "CM102", "ZTHP500"];

pub struct ConsumeAdapter {
    client: Arc<dyn BusinessServiceClient>,
}

impl ConsumeAdapter {
    pub fn new(client: Arc<dyn BusinessServiceClient>) -> Self {
        Self { client }
    }
}

/// Render cents as a fixed two-decimal amount.
fn format_cents(cents: u32) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[async_trait]
impl ProtocolAdapter for ConsumeAdapter {
    fn identify(&self) -> AdapterIdentity {
        AdapterIdentity {
            protocol_type: PROTOCOL_CONSUME.to_string(),
            manufacturer: "ZKTeco".to_string(),
            version: "V1.0".to_string(),
        }
    }

    fn supported_device_models(&self) -> &[&'static str] {
        SUPPORTED_MODELS
    }

    fn min_frame_len(&self) -> usize {
        CONSUME_MIN_FRAME_LEN
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, ParseError> {
        let frame = Frame::parse(bytes, CONSUME_MIN_FRAME_LEN)?;
        let code = frame.message_type_code();
        let name = match code {
            CONSUME_RECORD => MSG_CONSUME_RECORD.to_string(),
            DEVICE_STATUS => MSG_DEVICE_STATUS.to_string(),
            BALANCE_QUERY => MSG_BALANCE_QUERY.to_string(),
            other => unknown_type_name(other),
        };
        let mut message = ParsedMessage::from_frame(PROTOCOL_CONSUME, &frame, name);
        let mut body = frame.body_reader();

        match code {
            CONSUME_RECORD => {
                let card_no = body.read_u32()?;
                let amount = body.read_u32()?;
                let balance = body.read_u32()?;
                message.insert("cardNo", card_no);
                message.insert("amount", amount);
                message.insert("amountDecimal", format_cents(amount));
                message.insert("balance", balance);
                message.insert("balanceDecimal", format_cents(balance));
                message.insert("mealType", body.read_u8()?);
                message.insert("consumeType", body.read_u8()?);
            }
            DEVICE_STATUS => {
                let status = body.read_u8()?;
                message.insert("statusCode", status);
                message.insert("deviceStatus", DeviceStatus::from_code(status).as_str());
                message.insert("onlineStatus", body.read_u8()?);
            }
            BALANCE_QUERY => {
                message.insert("cardNo", body.read_u32()?);
            }
            _ => {}
        }

        debug!(
            device_code = message.device_code().unwrap_or_default(),
            message_type = message.message_type().unwrap_or_default(),
            "parsed consume frame"
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
            Some(MSG_CONSUME_RECORD) => {
                payload.insert("consumeTime".into(), ctx.now.to_rfc3339().into());
                BusinessRequest::post(CONSUME_RECORD_PATH, Value::Object(payload))
            }
            Some(MSG_BALANCE_QUERY) => {
                let card_no = message.field_u64("cardNo").unwrap_or_default();
                BusinessRequest::get(
                    format!("{BALANCE_QUERY_PATH}/{card_no}"),
                    Value::Object(payload),
                )
            }
            Some(MSG_DEVICE_STATUS) => {
                BusinessRequest::post(DEVICE_STATUS_PATH, Value::Object(payload))
            }
            _ => return Err(unknown_message(message)),
        };
        send(self.client.as_ref(), request).await
    }
}
