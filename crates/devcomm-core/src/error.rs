use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a failure may succeed if the same message is attempted again.
///
/// The class is fixed per error variant so that the lifecycle manager never
/// has to guess from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    Retryable,
    Terminal,
}

impl FailureClass {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Retryable)
    }
}

/// Frame decoding failures. All of them are terminal: the same bytes will
/// fail the same way on every attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Frame input is empty")]
    NullInput,

    #[error("Frame too short: {actual} bytes, at least {required} required")]
    TooShort { required: usize, actual: usize },

    #[error("Invalid frame header: expected AA55, got {found:04X}")]
    InvalidHeader { found: u16 },

    #[error("Checksum mismatch: expected {expected:04X}, got {actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Invalid hex frame: {0}")]
    InvalidHex(String),
}

impl ParseError {
    /// Stable machine-readable code persisted on failed records.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ParseError::NullInput => "PARSE_NULL_INPUT",
            ParseError::TooShort { .. } => "PARSE_TOO_SHORT",
            ParseError::InvalidHeader { .. } => "PARSE_INVALID_HEADER",
            ParseError::ChecksumMismatch { .. } => "PARSE_CHECKSUM_MISMATCH",
            ParseError::InvalidHex(_) => "PARSE_INVALID_HEX",
        }
    }
}

/// Reasons a parsed message is not fit for processing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is absent")]
    MessageAbsent,

    #[error("Message type is missing")]
    MissingMessageType,

    #[error("Device code is missing")]
    MissingDeviceCode,
}

impl ValidationError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::MessageAbsent => "VALIDATION_MESSAGE_ABSENT",
            ValidationError::MissingMessageType => "VALIDATION_MISSING_MESSAGE_TYPE",
            ValidationError::MissingDeviceCode => "VALIDATION_MISSING_DEVICE_CODE",
        }
    }
}

/// Failures raised while handing a validated message to a business service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Message has not passed validation")]
    ValidationFailed,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Downstream call timed out: {0}")]
    DownstreamTimeout(String),

    #[error("Downstream service unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("Downstream service rejected the request: {0}")]
    DownstreamRejected(String),
}

impl ProcessError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ProcessError::ValidationFailed => "PROCESS_VALIDATION_FAILED",
            ProcessError::UnknownMessageType(_) => "PROCESS_UNKNOWN_MESSAGE_TYPE",
            ProcessError::DownstreamTimeout(_) => "PROCESS_DOWNSTREAM_TIMEOUT",
            ProcessError::DownstreamUnavailable(_) => "PROCESS_DOWNSTREAM_UNAVAILABLE",
            ProcessError::DownstreamRejected(_) => "PROCESS_DOWNSTREAM_REJECTED",
        }
    }

    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            ProcessError::DownstreamTimeout(_) | ProcessError::DownstreamUnavailable(_) => {
                FailureClass::Retryable
            }
            _ => FailureClass::Terminal,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    // Routing errors
    #[error("No adapter registered for protocol type: {0}")]
    AdapterNotFound(String),

    #[error("Unsupported device model: {0}")]
    UnsupportedDeviceModel(String),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    // Lifecycle errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Message {message_id} is no longer in state {expected}")]
    ConcurrentModification {
        message_id: String,
        expected: String,
    },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Dispatch lane closed for device {0}")]
    LaneClosed(String),

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable code persisted on failed records.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Parse(e) => e.error_code(),
            Error::Validation(e) => e.error_code(),
            Error::Process(e) => e.error_code(),
            Error::AdapterNotFound(_) => "ADAPTER_NOT_FOUND",
            Error::UnsupportedDeviceModel(_) => "UNSUPPORTED_DEVICE_MODEL",
            Error::InvalidDeviceId(_) => "INVALID_DEVICE_ID",
            Error::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Error::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Error::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Error::LaneClosed(_) => "LANE_CLOSED",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Numeric code carried in NAK frames sent back to devices.
    ///
    /// High byte is the error family (1 parse, 2 validation, 3 process,
    /// 4 routing), low byte the variant.
    #[must_use]
    pub fn nak_code(&self) -> u16 {
        match self {
            Error::Parse(e) => match e {
                ParseError::NullInput => 0x0101,
                ParseError::TooShort { .. } => 0x0102,
                ParseError::InvalidHeader { .. } => 0x0103,
                ParseError::ChecksumMismatch { .. } => 0x0104,
                ParseError::InvalidHex(_) => 0x0105,
            },
            Error::Validation(e) => match e {
                ValidationError::MessageAbsent => 0x0201,
                ValidationError::MissingMessageType => 0x0202,
                ValidationError::MissingDeviceCode => 0x0203,
            },
            Error::Process(e) => match e {
                ProcessError::ValidationFailed => 0x0301,
                ProcessError::UnknownMessageType(_) => 0x0302,
                ProcessError::DownstreamTimeout(_) => 0x0303,
                ProcessError::DownstreamUnavailable(_) => 0x0304,
                ProcessError::DownstreamRejected(_) => 0x0305,
            },
            Error::AdapterNotFound(_) => 0x0401,
            Error::UnsupportedDeviceModel(_) => 0x0402,
            _ => 0x04FF,
        }
    }

    /// Retryable errors are downstream outages and storage hiccups; anything
    /// derived from the frame itself is terminal.
    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::Process(e) => e.failure_class(),
            Error::Storage(_) => FailureClass::Retryable,
            _ => FailureClass::Terminal,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.failure_class().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
