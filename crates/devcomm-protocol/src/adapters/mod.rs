//! Built-in adapters for the supported terminal families.

pub mod access;
pub mod attendance;
pub mod consume;

pub use access::AccessAdapter;
pub use attendance::AttendanceAdapter;
pub use consume::ConsumeAdapter;

use crate::adapter::ProtocolAdapter;
use crate::message::ParsedMessage;
use crate::service::{BusinessRequest, BusinessServiceClient, ProcessContext};
use chrono::{DateTime, Utc};
use devcomm_core::{ProcessError, ProcessResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Shared downstream path for DEVICE_STATUS messages of every family.
pub const DEVICE_STATUS_PATH: &str = "/api/v1/device/status";

/// The three built-in adapters wired to one business client.
pub fn builtin_adapters(client: Arc<dyn BusinessServiceClient>) -> Vec<Arc<dyn ProtocolAdapter>> {
    vec![
        Arc::new(AccessAdapter::new(client.clone())),
        Arc::new(AttendanceAdapter::new(client.clone())),
        Arc::new(ConsumeAdapter::new(client)),
    ]
}

/// Name given to message type codes a family does not define.
pub(crate) fn unknown_type_name(code: u8) -> String {
    format!("UNKNOWN_0x{code:02X}")
}

/// Request payload: identifying envelope fields plus every decoded field.
pub(crate) fn base_payload(message: &ParsedMessage, ctx: &ProcessContext) -> Map<String, Value> {
    let mut payload: Map<String, Value> = message.data.clone().into_iter().collect();
    payload.insert("deviceId".into(), ctx.device_id.as_str().into());
    payload.insert(
        "deviceCode".into(),
        message.device_code().unwrap_or_default().into(),
    );
    payload.insert("messageId".into(), ctx.message_id.clone().into());
    payload.insert("sequenceNumber".into(), message.sequence_number.into());
    payload
}

/// Device event time, falling back to the processing time when the device
/// sent none.
pub(crate) fn event_time(message: &ParsedMessage, key: &str, ctx: &ProcessContext) -> String {
    message
        .field_u64(key)
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or(ctx.now)
        .to_rfc3339()
}

/// Send a request and fold the service answer into a process outcome.
pub(crate) async fn send(
    client: &dyn BusinessServiceClient,
    request: BusinessRequest,
) -> Result<ProcessResult, ProcessError> {
    let path = request.action_path.clone();
    let response = client.call(request).await?;
    debug!(path = %path, result = response.result.as_str(), "business call returned");
    match response.result {
        ProcessResult::Failed => Err(ProcessError::DownstreamRejected(format!(
            "{path} returned failure: {}",
            response.body
        ))),
        result => Ok(result),
    }
}

pub(crate) fn unknown_message(message: &ParsedMessage) -> ProcessError {
    ProcessError::UnknownMessageType(message.message_type().unwrap_or_default().to_string())
}
