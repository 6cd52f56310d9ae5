use crate::error::{StorageError, StorageResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use devcomm_core::{
    DeviceId, LifecycleState, MessageDirection, MessageStatus, Priority, ProcessResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persisted unit of work for one received frame.
///
/// Created when a frame arrives and afterwards only changed through
/// [`RecordUpdate`]s applied by the lifecycle manager. `message_status` is
/// always derived from `lifecycle_state`.
///
/// # Fields
///
/// * `raw_hex_data` / `raw_byte_data` - the frame as received, upper-case hex
///   and base64; retries decode `raw_byte_data`
/// * `command_code` - message type byte, e.g. `0x01`
/// * `checksum` - verified frame checksum as four hex digits
/// * `next_retry_time` - set only while `RETRY_SCHEDULED`
/// * `deleted` - logical deletion flag, only set on terminal records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessageRecord {
    pub message_id: String,
    pub device_id: String,
    pub device_code: Option<String>,
    pub protocol_type: String,
    pub message_direction: MessageDirection,
    pub message_type: Option<String>,
    pub command_code: Option<String>,
    pub raw_hex_data: String,
    pub raw_byte_data: String,
    pub business_data: Option<Value>,
    pub message_status: MessageStatus,
    pub lifecycle_state: LifecycleState,
    pub process_result: Option<ProcessResult>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Milliseconds spent in the last attempt
    pub process_duration: Option<i64>,
    pub sequence_number: Option<u32>,
    pub session_id: Option<String>,
    pub signature: Option<String>,
    pub checksum: Option<String>,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retry_count: u32,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub receive_time: DateTime<Utc>,
    pub process_time: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl ProtocolMessageRecord {
    /// New UP record in `RECEIVED` for a raw frame.
    pub fn received(
        device_id: &DeviceId,
        protocol_type: &str,
        raw: &[u8],
        priority: Priority,
        max_retry_count: u32,
        receive_time: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            device_code: None,
            protocol_type: protocol_type.to_string(),
            message_direction: MessageDirection::Up,
            message_type: None,
            command_code: None,
            raw_hex_data: hex::encode_upper(raw),
            raw_byte_data: BASE64.encode(raw),
            business_data: None,
            message_status: MessageStatus::Pending,
            lifecycle_state: LifecycleState::Received,
            process_result: None,
            error_code: None,
            error_message: None,
            process_duration: None,
            sequence_number: None,
            session_id: None,
            signature: None,
            checksum: None,
            priority,
            retry_count: 0,
            max_retry_count,
            next_retry_time: None,
            receive_time,
            process_time: None,
            deleted: false,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    /// Frame bytes as originally received.
    ///
    /// # Errors
    /// Returns `StorageError::Encoding` if the stored base64 is corrupt.
    pub fn raw_bytes(&self) -> StorageResult<Vec<u8>> {
        BASE64
            .decode(&self.raw_byte_data)
            .map_err(|e| StorageError::Encoding(format!("{}: {e}", self.message_id)))
    }

    /// `(device_id, sequence_number)` deduplication key, once parsed.
    pub fn dedup_key(&self) -> Option<(&str, u32)> {
        self.sequence_number.map(|seq| (self.device_id.as_str(), seq))
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle_state.is_terminal()
    }

    /// Apply an update in place. Stores call this after their state check.
    pub fn apply(&mut self, update: &RecordUpdate) {
        self.lifecycle_state = update.state;
        self.message_status = update.state.message_status();

        if let Some(protocol_type) = &update.protocol_type {
            self.protocol_type = protocol_type.clone();
        }
        if let Some(device_code) = &update.device_code {
            self.device_code = Some(device_code.clone());
        }
        if let Some(message_type) = &update.message_type {
            self.message_type = Some(message_type.clone());
        }
        if let Some(command_code) = &update.command_code {
            self.command_code = Some(command_code.clone());
        }
        if let Some(sequence_number) = update.sequence_number {
            self.sequence_number = Some(sequence_number);
        }
        if let Some(checksum) = &update.checksum {
            self.checksum = Some(checksum.clone());
        }
        if let Some(business_data) = &update.business_data {
            self.business_data = Some(business_data.clone());
        }
        if let Some(result) = update.process_result {
            self.process_result = Some(result);
        }
        if update.clear_error {
            self.error_code = None;
            self.error_message = None;
        }
        if let Some((code, message)) = &update.error {
            self.error_code = Some(code.clone());
            self.error_message = Some(message.clone());
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        self.next_retry_time = update.next_retry_time;
        if let Some(process_time) = update.process_time {
            self.process_time = Some(process_time);
        }
        if let Some(duration) = update.process_duration {
            self.process_duration = Some(duration);
        }
    }
}

/// Changes written together with a lifecycle transition.
///
/// `None` leaves a column untouched, except `next_retry_time`, which is
/// always written so it can only survive in `RETRY_SCHEDULED`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub state: LifecycleState,
    pub protocol_type: Option<String>,
    pub device_code: Option<String>,
    pub message_type: Option<String>,
    pub command_code: Option<String>,
    pub sequence_number: Option<u32>,
    pub checksum: Option<String>,
    pub business_data: Option<Value>,
    pub process_result: Option<ProcessResult>,
    /// `(error_code, error_message)`
    pub error: Option<(String, String)>,
    pub clear_error: bool,
    pub retry_count: Option<u32>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub process_time: Option<DateTime<Utc>>,
    pub process_duration: Option<i64>,
}

impl RecordUpdate {
    pub fn to(state: LifecycleState) -> Self {
        Self {
            state,
            protocol_type: None,
            device_code: None,
            message_type: None,
            command_code: None,
            sequence_number: None,
            checksum: None,
            business_data: None,
            process_result: None,
            error: None,
            clear_error: false,
            retry_count: None,
            next_retry_time: None,
            process_time: None,
            process_duration: None,
        }
    }

    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some((code.into(), message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.clear_error = true;
        self
    }

    pub fn process_result(mut self, result: ProcessResult) -> Self {
        self.process_result = Some(result);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn next_retry_time(mut self, at: DateTime<Utc>) -> Self {
        self.next_retry_time = Some(at);
        self
    }

    /// Stamp processing time and duration.
    pub fn processed_at(mut self, at: DateTime<Utc>, duration_ms: i64) -> Self {
        self.process_time = Some(at);
        self.process_duration = Some(duration_ms);
        self
    }
}
