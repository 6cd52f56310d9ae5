//! The protocol adapter contract.
//!
//! One adapter exists per protocol family. The dispatch layer only knows
//! this trait, so adding a family means implementing it and registering
//! the adapter; nothing upstream changes.
//!
//! An attempt always runs `parse` → `validate` → `process`:
//!
//! - `parse` verifies the frame and extracts the body fields
//! - `validate` checks the envelope fields and marks the message
//!   [`ParseStatus::Validated`]
//! - `process` refuses anything not validated, then calls
//!   [`ProtocolAdapter::handle`] which talks to the business service

use crate::frame::{FrameBuilder, decode_hex};
use crate::message::{ParseStatus, ParsedMessage};
use crate::service::ProcessContext;
use async_trait::async_trait;
use bytes::Bytes;
use devcomm_core::constants::{RESPONSE_ACK, RESPONSE_NAK};
use devcomm_core::{ParseError, ProcessError, ProcessResult, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Diagnostic identity of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterIdentity {
    pub protocol_type: String,
    pub manufacturer: String,
    pub version: String,
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Routing key plus informational manufacturer and version.
    fn identify(&self) -> AdapterIdentity;

    /// Device models speaking this protocol.
    fn supported_device_models(&self) -> &[&'static str];

    /// Shortest frame this protocol accepts.
    fn min_frame_len(&self) -> usize;

    /// Decode and checksum-verify a raw frame.
    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, ParseError>;

    /// Handle a validated message. Only reached through [`Self::process`].
    async fn handle(
        &self,
        message: &ParsedMessage,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult, ProcessError>;

    /// Decode a frame supplied as hex text.
    fn parse_hex(&self, text: &str) -> Result<ParsedMessage, ParseError> {
        let bytes = decode_hex(text)?;
        self.parse(&bytes)
    }

    /// Report why a message is not fit for processing.
    fn check(&self, message: Option<&ParsedMessage>) -> Result<(), ValidationError> {
        let message = message.ok_or(ValidationError::MessageAbsent)?;
        if message.message_type().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingMessageType);
        }
        if message.device_code().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingDeviceCode);
        }
        Ok(())
    }

    /// Mark the message validated if it passes [`Self::check`]. Never fails.
    fn validate(&self, message: Option<&mut ParsedMessage>) -> bool {
        let Some(message) = message else {
            return false;
        };
        match self.check(Some(&*message)) {
            Ok(()) => {
                message.status = ParseStatus::Validated;
                true
            }
            Err(reason) => {
                debug!(
                    protocol = %message.protocol_type,
                    reason = %reason,
                    "message failed validation"
                );
                false
            }
        }
    }

    /// Process a validated message.
    ///
    /// # Errors
    /// `ProcessError::ValidationFailed` without any downstream call if the
    /// message was not validated; otherwise whatever [`Self::handle`] returns.
    async fn process(
        &self,
        message: &ParsedMessage,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult, ProcessError> {
        if !message.is_validated() {
            return Err(ProcessError::ValidationFailed);
        }
        self.handle(message, ctx).await
    }

    /// Build the acknowledgement frame sent back to the device.
    ///
    /// `error_code` of `None` produces an ACK, anything else a NAK. The body
    /// echoes the message type code as a u8, then the error code as a u16
    /// (0 on ACK).
    fn build_response(&self, message: &ParsedMessage, error_code: Option<u16>) -> Bytes {
        let (kind, code) = match error_code {
            None => (RESPONSE_ACK, 0),
            Some(code) => (RESPONSE_NAK, code),
        };
        FrameBuilder::new(
            kind,
            message.device_code().unwrap_or_default(),
            message.sequence_number,
        )
        .u8(message.message_type_code)
        .u16(code)
        .min_len(self.min_frame_len())
        .build()
    }
}
