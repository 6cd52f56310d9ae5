//! Wire-level constants shared by every terminal protocol family.
//!
//! All supported families (access controllers, attendance clocks and
//! consumption terminals) use the same binary envelope:
//!
//! ```text
//! AA 55 | type | device code (8) | sequence (u32 LE) | body ... | checksum (u16 LE)
//! ```
//!
//! - The header marker is always `0xAA 0x55`.
//! - The device code is ASCII, right-padded with spaces.
//! - The checksum is the 16-bit wrapping sum of every byte between the
//!   header and the checksum itself.
//!
//! # Usage
//!
//! ```
//! use devcomm_core::constants::*;
//!
//! assert_eq!(FRAME_HEADER, [0xAA, 0x55]);
//! assert_eq!(BODY_OFFSET, 15);
//! assert!(ACCESS_MIN_FRAME_LEN > FRAME_OVERHEAD);
//! ```

// ============================================================================
// Envelope layout
// ============================================================================

/// Two-byte marker opening every frame.
pub const FRAME_HEADER: [u8; 2] = [0xAA, 0x55];

/// Length of the header marker.
pub const HEADER_LEN: usize = 2;

/// Offset of the message type byte.
pub const MESSAGE_TYPE_OFFSET: usize = 2;

/// Offset of the fixed-width device code.
pub const DEVICE_CODE_OFFSET: usize = 3;

/// Width of the device code field in bytes.
pub const DEVICE_CODE_LEN: usize = 8;

/// Offset of the little-endian sequence number.
pub const SEQUENCE_OFFSET: usize = DEVICE_CODE_OFFSET + DEVICE_CODE_LEN;

/// Offset where the protocol-specific body starts.
pub const BODY_OFFSET: usize = SEQUENCE_OFFSET + 4;

/// Length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Bytes every frame carries besides its body.
pub const FRAME_OVERHEAD: usize = BODY_OFFSET + CHECKSUM_LEN;

/// Padding byte used for short device codes.
pub const DEVICE_CODE_PAD: u8 = b' ';

// ============================================================================
// Protocol families
// ============================================================================

/// Routing key of the door-access controller family.
pub const PROTOCOL_ACCESS: &str = "ACCESS_ENTROPY_V4_8";

/// Routing key of the attendance clock family.
pub const PROTOCOL_ATTENDANCE: &str = "ATTENDANCE_ENTROPY_V4_0";

/// Routing key of the consumption terminal family.
pub const PROTOCOL_CONSUME: &str = "CONSUME_ZKTECO_V1_0";

/// Protocol type recorded when no adapter could be resolved for a device.
pub const PROTOCOL_UNRESOLVED: &str = "UNRESOLVED";

/// Minimum frame length for access controllers.
pub const ACCESS_MIN_FRAME_LEN: usize = 24;

/// Minimum frame length for attendance clocks.
pub const ATTENDANCE_MIN_FRAME_LEN: usize = 20;

/// Minimum frame length for consumption terminals.
pub const CONSUME_MIN_FRAME_LEN: usize = 28;

// ============================================================================
// Message type names
// ============================================================================

pub const MSG_ACCESS_RECORD: &str = "ACCESS_RECORD";
pub const MSG_ALARM_EVENT: &str = "ALARM_EVENT";
pub const MSG_ATTENDANCE_RECORD: &str = "ATTENDANCE_RECORD";
pub const MSG_CONSUME_RECORD: &str = "CONSUME_RECORD";
pub const MSG_BALANCE_QUERY: &str = "BALANCE_QUERY";
pub const MSG_DEVICE_STATUS: &str = "DEVICE_STATUS";

// ============================================================================
// Device responses
// ============================================================================

/// Message type of a positive acknowledgement sent back to a device.
pub const RESPONSE_ACK: u8 = 0xF0;

/// Message type of a negative acknowledgement sent back to a device.
pub const RESPONSE_NAK: u8 = 0xF1;

// ============================================================================
// Retry defaults
// ============================================================================

/// Default number of attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

/// Default base delay for retry backoff in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Default upper bound for retry backoff in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 300_000;

/// Default per-message processing timeout in milliseconds.
pub const DEFAULT_PROCESS_TIMEOUT_MS: u64 = 3_000;
