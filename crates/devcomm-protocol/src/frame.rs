use bytes::{BufMut, Bytes, BytesMut};
use devcomm_core::{ParseError, constants::*};
use std::fmt;
use tracing::trace;

/// A binary terminal frame whose envelope and checksum have been verified.
///
/// # Wire Format
///
/// ```text
/// offset  size  field
/// 0       2     header marker AA 55
/// 2       1     message type code
/// 3       8     device code, ASCII, space padded
/// 11      4     sequence number (u32 LE)
/// 15      n     protocol-specific body
/// 15+n    2     checksum (u16 LE)
/// ```
///
/// The checksum is the 16-bit wrapping sum of bytes `[2, len - 2)`.
///
/// # Basic Usage
/// ```
/// use devcomm_protocol::{Frame, FrameBuilder};
///
/// let bytes = FrameBuilder::new(0x01, "DEV001", 7)
///     .u32(1001)
///     .u8(0)
///     .u8(1)
///     .u8(1)
///     .build();
///
/// let frame = Frame::parse(&bytes, 24).unwrap();
/// assert_eq!(frame.message_type_code(), 0x01);
/// assert_eq!(frame.device_code().as_deref(), Some("DEV001"));
/// assert_eq!(frame.sequence_number(), 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw bytes exactly as received, checksum included
    data: Bytes,

    /// Verified checksum
    checksum: u16,
}

impl Frame {
    /// Verify and wrap a raw frame.
    ///
    /// Checks run in order: empty input, minimum length, header marker,
    /// checksum. The input is never truncated or padded.
    ///
    /// # Errors
    /// - `ParseError::NullInput` for an empty slice
    /// - `ParseError::TooShort` if shorter than `min_len` (or the envelope)
    /// - `ParseError::InvalidHeader` if the first two bytes are not `AA 55`
    /// - `ParseError::ChecksumMismatch` if the trailing checksum is wrong
    pub fn parse(bytes: &[u8], min_len: usize) -> Result<Self, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::NullInput);
        }

        let required = min_len.max(FRAME_OVERHEAD);
        if bytes.len() < required {
            return Err(ParseError::TooShort {
                required,
                actual: bytes.len(),
            });
        }

        if bytes[..HEADER_LEN] != FRAME_HEADER {
            return Err(ParseError::InvalidHeader {
                found: u16::from_be_bytes([bytes[0], bytes[1]]),
            });
        }

        let checksum = verify_checksum(bytes)?;

        Ok(Frame {
            data: Bytes::copy_from_slice(bytes),
            checksum,
        })
    }

    /// Message type code of the frame.
    pub fn message_type_code(&self) -> u8 {
        self.data[MESSAGE_TYPE_OFFSET]
    }

    /// The fixed-width device code field, padding included.
    pub fn device_code_raw(&self) -> &[u8] {
        &self.data[DEVICE_CODE_OFFSET..DEVICE_CODE_OFFSET + DEVICE_CODE_LEN]
    }

    /// Device code with padding removed; `None` when the field is blank.
    pub fn device_code(&self) -> Option<String> {
        let code = String::from_utf8_lossy(self.device_code_raw());
        let code = code.trim_matches(|c: char| c == ' ' || c == '\0');
        if code.is_empty() {
            None
        } else {
            Some(code.to_string())
        }
    }

    /// Device-assigned sequence number.
    pub fn sequence_number(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[SEQUENCE_OFFSET..BODY_OFFSET]);
        u32::from_le_bytes(raw)
    }

    /// Protocol-specific body between envelope and checksum.
    pub fn body(&self) -> &[u8] {
        &self.data[BODY_OFFSET..self.data.len() - CHECKSUM_LEN]
    }

    /// Cursor over the body for field extraction.
    pub fn body_reader(&self) -> BodyReader<'_> {
        BodyReader {
            body: self.body(),
            pos: 0,
            frame_len: self.data.len(),
        }
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Upper-case hex rendering of the whole frame.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.data)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Frame[type=0x{:02X}, device={}, seq={}, size={}]",
            self.message_type_code(),
            self.device_code().unwrap_or_default(),
            self.sequence_number(),
            self.data.len()
        )
    }
}

/// Calculate the 16-bit wrapping sum of a byte slice.
pub fn calculate_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Verify the trailing checksum of a complete frame and return it.
///
/// The covered range is everything after the header marker and before the
/// checksum itself.
///
/// # Errors
/// Returns `ParseError::TooShort` if the slice cannot hold header and
/// checksum, and `ParseError::ChecksumMismatch` if the values differ.
pub fn verify_checksum(frame: &[u8]) -> Result<u16, ParseError> {
    let required = HEADER_LEN + CHECKSUM_LEN;
    if frame.len() < required {
        return Err(ParseError::TooShort {
            required,
            actual: frame.len(),
        });
    }

    let end = frame.len() - CHECKSUM_LEN;
    let expected = calculate_checksum(&frame[HEADER_LEN..end]);
    let actual = u16::from_le_bytes([frame[end], frame[end + 1]]);

    trace!(expected, actual, "verifying frame checksum");

    if expected != actual {
        return Err(ParseError::ChecksumMismatch { expected, actual });
    }
    Ok(actual)
}

/// Decode a frame given as hex text. Whitespace is ignored.
///
/// # Errors
/// Returns `ParseError::NullInput` for blank text and `ParseError::InvalidHex`
/// for anything that is not an even run of hex digits.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, ParseError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ParseError::NullInput);
    }
    hex::decode(&compact).map_err(|e| ParseError::InvalidHex(e.to_string()))
}

/// Sequential little-endian reader over a frame body.
///
/// Running past the end of the body is reported as `ParseError::TooShort`
/// in terms of the whole frame, so callers see how long the frame should
/// have been.
#[derive(Debug, Clone)]
pub struct BodyReader<'a> {
    body: &'a [u8],
    pos: usize,
    frame_len: usize,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::TooShort {
                required: self.frame_len + (n - self.remaining()),
                actual: self.frame_len,
            });
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a trailing optional u32; zero (padding) reads as absent.
    pub fn read_optional_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        self.read_u32().ok().filter(|v| *v != 0)
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }
}

/// Assembles a frame and seals its checksum.
///
/// Used to build acknowledgements sent back to devices, and by tests.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    buf: BytesMut,
    min_len: usize,
}

impl FrameBuilder {
    /// Start a frame with the given type, device code and sequence number.
    ///
    /// Device codes longer than 8 bytes are cut; shorter ones are padded
    /// with spaces.
    pub fn new(message_type: u8, device_code: &str, sequence_number: u32) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(&FRAME_HEADER);
        buf.put_u8(message_type);

        let code = device_code.as_bytes();
        let n = code.len().min(DEVICE_CODE_LEN);
        buf.put_slice(&code[..n]);
        buf.put_bytes(DEVICE_CODE_PAD, DEVICE_CODE_LEN - n);

        buf.put_u32_le(sequence_number);
        Self { buf, min_len: 0 }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.put_slice(value);
        self
    }

    /// Zero-pad the body so the finished frame is at least `len` bytes.
    pub fn min_len(mut self, len: usize) -> Self {
        self.min_len = len;
        self
    }

    pub fn build(mut self) -> Bytes {
        let target = self.min_len.saturating_sub(CHECKSUM_LEN);
        if self.buf.len() < target {
            let pad = target - self.buf.len();
            self.buf.put_bytes(0, pad);
        }
        let checksum = calculate_checksum(&self.buf[HEADER_LEN..]);
        self.buf.put_u16_le(checksum);
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn access_frame() -> Bytes {
        FrameBuilder::new(0x01, "DEV001", 42)
            .u32(1001)
            .u8(0)
            .u8(1)
            .u8(1)
            .build()
    }

    #[test]
    fn test_builder_layout() {
        let bytes = access_frame();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..2], &[0xAA, 0x55]);
        assert_eq!(bytes[2], 0x01);
        assert_eq!(&bytes[3..11], b"DEV001  ");
        assert_eq!(&bytes[11..15], &42u32.to_le_bytes());
        assert_eq!(&bytes[15..19], &1001u32.to_le_bytes());
    }

    #[test]
    fn test_parse_valid_frame() {
        let bytes = access_frame();
        let frame = Frame::parse(&bytes, 24).unwrap();

        assert_eq!(frame.message_type_code(), 0x01);
        assert_eq!(frame.device_code(), Some("DEV001".to_string()));
        assert_eq!(frame.device_code_raw(), b"DEV001  ");
        assert_eq!(frame.sequence_number(), 42);
        assert_eq!(frame.body().len(), 7);
        assert_eq!(frame.len(), bytes.len());
        assert_eq!(frame.as_bytes(), &bytes[..]);
    }

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(Frame::parse(&[], 24), Err(ParseError::NullInput));
    }

    #[rstest]
    #[case(1)]
    #[case(10)]
    #[case(23)]
    fn test_parse_too_short(#[case] len: usize) {
        let bytes = vec![0xAA; len];
        assert_eq!(
            Frame::parse(&bytes, 24),
            Err(ParseError::TooShort {
                required: 24,
                actual: len
            })
        );
    }

    #[test]
    fn test_minimum_below_envelope_is_raised_to_envelope() {
        let bytes = vec![0xAA, 0x55, 0x01];
        assert!(matches!(
            Frame::parse(&bytes, 0),
            Err(ParseError::TooShort { required: 17, .. })
        ));
    }

    #[test]
    fn test_parse_invalid_header() {
        let mut bytes = access_frame().to_vec();
        bytes[0] = 0x55;
        bytes[1] = 0xAA;
        assert_eq!(
            Frame::parse(&bytes, 24),
            Err(ParseError::InvalidHeader { found: 0x55AA })
        );
    }

    #[test]
    fn test_parse_checksum_mismatch() {
        let mut bytes = access_frame().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Frame::parse(&bytes, 24),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupted_body_is_detected() {
        let mut bytes = access_frame().to_vec();
        bytes[16] = bytes[16].wrapping_add(1);
        assert!(matches!(
            Frame::parse(&bytes, 24),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_wraps_at_16_bits() {
        let data = vec![0xFF; 300];
        assert_eq!(calculate_checksum(&data), ((0xFFu32 * 300) % 65536) as u16);
    }

    #[test]
    fn test_blank_device_code() {
        let bytes = FrameBuilder::new(0x02, "", 1).u8(1).min_len(24).build();
        let frame = Frame::parse(&bytes, 24).unwrap();
        assert_eq!(frame.device_code(), None);
    }

    #[test]
    fn test_long_device_code_is_cut() {
        let bytes = FrameBuilder::new(0x02, "GATE-000042", 1).min_len(24).build();
        let frame = Frame::parse(&bytes, 24).unwrap();
        assert_eq!(frame.device_code().as_deref(), Some("GATE-000"));
    }

    #[test]
    fn test_min_len_pads_body() {
        let bytes = FrameBuilder::new(0x02, "DEV001", 1).u8(1).min_len(28).build();
        assert_eq!(bytes.len(), 28);
        let frame = Frame::parse(&bytes, 28).unwrap();
        assert_eq!(frame.body()[0], 1);
        assert!(frame.body()[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_body_reader_reports_missing_bytes() {
        let bytes = FrameBuilder::new(0x01, "DEV001", 1).u16(7).build();
        let frame = Frame::parse(&bytes, 0).unwrap();
        let mut reader = frame.body_reader();
        assert_eq!(reader.read_u16().unwrap(), 7);
        assert_eq!(
            reader.read_u32(),
            Err(ParseError::TooShort {
                required: bytes.len() + 4,
                actual: bytes.len()
            })
        );
        assert_eq!(reader.read_optional_u32(), None);
    }

    #[test]
    fn test_decode_hex() {
        let bytes = access_frame();
        let text = hex::encode_upper(&bytes);
        assert_eq!(decode_hex(&text).unwrap(), bytes.to_vec());

        let spaced = text
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(decode_hex(&spaced).unwrap(), bytes.to_vec());

        assert_eq!(decode_hex("  "), Err(ParseError::NullInput));
        assert!(matches!(decode_hex("AA5"), Err(ParseError::InvalidHex(_))));
        assert!(matches!(decode_hex("ZZ"), Err(ParseError::InvalidHex(_))));
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::parse(&access_frame(), 24).unwrap();
        let display = frame.to_string();
        assert!(display.contains("type=0x01"));
        assert!(display.contains("device=DEV001"));
        assert!(display.contains("seq=42"));
        assert_eq!(frame.to_hex().len(), 48);
    }
}
