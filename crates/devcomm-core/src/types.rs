use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of an external device identifier.
pub const MAX_DEVICE_ID_LEN: usize = 64;

/// External identity of a terminal as handed over by the transport layer.
///
/// This is not the 8-byte device code carried inside the frame: the
/// transport knows devices by their registered id, the frame only by the
/// code configured on the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the trimmed id is empty, longer than
    /// 64 bytes or contains whitespace.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidDeviceId("device id is empty".to_string()));
        }
        if id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::InvalidDeviceId(format!(
                "device id exceeds {MAX_DEVICE_ID_LEN} bytes: {id}"
            )));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidDeviceId(format!(
                "device id contains whitespace: {id}"
            )));
        }
        Ok(DeviceId(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

/// Direction of a message relative to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDirection {
    /// Device to server
    Up,
    /// Server to device
    Down,
}

impl MessageDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageDirection::Up => "UP",
            MessageDirection::Down => "DOWN",
        }
    }
}

impl FromStr for MessageDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UP" => Ok(MessageDirection::Up),
            "DOWN" => Ok(MessageDirection::Down),
            other => Err(Error::Storage(format!("unknown message direction: {other}"))),
        }
    }
}

/// Sweep priority of a record. Only affects the order in which due retries
/// are claimed, never whether they are retried.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    /// Sort rank, lower is claimed first.
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    #[must_use]
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other => Err(Error::Config(format!("unknown priority: {other}"))),
        }
    }
}

/// Coarse delivery status exposed on persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Processed,
    Failed,
    Ignored,
}

impl MessageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Ignored => "IGNORED",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(MessageStatus::Pending),
            "PROCESSED" => Ok(MessageStatus::Processed),
            "FAILED" => Ok(MessageStatus::Failed),
            "IGNORED" => Ok(MessageStatus::Ignored),
            other => Err(Error::Storage(format!("unknown message status: {other}"))),
        }
    }
}

/// Outcome reported by an adapter or business service for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessResult {
    Success,
    Failed,
    Partial,
}

impl ProcessResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessResult::Success => "SUCCESS",
            ProcessResult::Failed => "FAILED",
            ProcessResult::Partial => "PARTIAL",
        }
    }
}

impl FromStr for ProcessResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SUCCESS" => Ok(ProcessResult::Success),
            "FAILED" => Ok(ProcessResult::Failed),
            "PARTIAL" => Ok(ProcessResult::Partial),
            other => Err(Error::Storage(format!("unknown process result: {other}"))),
        }
    }
}

/// Verification method reported by access controllers and attendance clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyMethod {
    Password,
    Fingerprint,
    Card,
    Face,
    Palm,
    Iris,
    Voice,
    Mixed,
    Unknown,
}

impl VerifyMethod {
    #[inline]
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => VerifyMethod::Password,
            1 => VerifyMethod::Fingerprint,
            2 => VerifyMethod::Card,
            3 => VerifyMethod::Face,
            4 => VerifyMethod::Palm,
            5 => VerifyMethod::Iris,
            6 => VerifyMethod::Voice,
            15 => VerifyMethod::Mixed,
            _ => VerifyMethod::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VerifyMethod::Password => "PASSWORD",
            VerifyMethod::Fingerprint => "FINGERPRINT",
            VerifyMethod::Card => "CARD",
            VerifyMethod::Face => "FACE",
            VerifyMethod::Palm => "PALM",
            VerifyMethod::Iris => "IRIS",
            VerifyMethod::Voice => "VOICE",
            VerifyMethod::Mixed => "MIXED",
            VerifyMethod::Unknown => "UNKNOWN",
        }
    }
}

/// Health reported in DEVICE_STATUS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Online,
    Maintain,
    Offline,
}

impl DeviceStatus {
    #[inline]
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DeviceStatus::Online,
            2 => DeviceStatus::Maintain,
            _ => DeviceStatus::Offline,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "ONLINE",
            DeviceStatus::Maintain => "MAINTAIN",
            DeviceStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
