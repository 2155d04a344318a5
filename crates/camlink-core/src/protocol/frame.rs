//! Frame encoding/decoding
//!
//! Implements the checksummed frame format of the packet protocol.
//!
//! Frame format (13 bytes):
//! - 4 bytes: Header `7E 00 08 00`
//! - 1 byte: Opcode
//! - 6 bytes: Parameters (status + payload in replies)
//! - 1 byte: Checksum (sum of bytes 1..=10, mod 256)
//! - 1 byte: Tail `E7`
//!
//! Upload replies carry `expected_len` payload bytes between the parameters
//! and the checksum, so they are `13 + expected_len` bytes long.

use byteorder::{BigEndian, ByteOrder};

use super::{ProtocolError, REPLY_LEN};

/// Constant frame header
pub const HEADER: [u8; 4] = [0x7E, 0x00, 0x08, 0x00];

/// Constant frame tail
pub const TAIL: u8 = 0xE7;

/// Number of parameter bytes in every command
pub const PARAM_LEN: usize = 6;

/// Offset of the status byte in a reply
pub const STATUS_OFFSET: usize = 5;

/// Offset of the image payload inside an upload reply
pub const PAYLOAD_OFFSET: usize = 11;

/// A decoded 13-byte reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Opcode echoed by the device
    pub opcode: u8,
    /// The six parameter bytes; the first is the status
    pub parameters: [u8; PARAM_LEN],
    /// Checksum as received
    pub checksum: u8,
}

impl Response {
    /// Status byte (0 = success)
    pub fn status(&self) -> u8 {
        self.parameters[0]
    }

    /// Whether the device reported success
    pub fn is_ok(&self) -> bool {
        self.status() == 0
    }

    /// Opcode-dependent bytes following the status
    pub fn payload(&self) -> &[u8] {
        &self.parameters[1..]
    }
}

/// Result of a successful TAKEPIC command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureResult {
    /// Size of the captured image in bytes
    pub total_bytes: u32,
    /// Number of upload packets the image is split into
    pub packet_count: u16,
}

/// Compute the checksum of a frame: every byte after the first header byte, mod 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .skip(1)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a command into a 13-byte frame
pub fn encode(opcode: u8, parameters: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if parameters.len() != PARAM_LEN {
        return Err(ProtocolError::InvalidParameter(format!(
            "opcode {:#04x} takes {} parameter bytes, got {}",
            opcode,
            PARAM_LEN,
            parameters.len()
        )));
    }

    let mut frame = Vec::with_capacity(REPLY_LEN);
    frame.extend_from_slice(&HEADER);
    frame.push(opcode);
    frame.extend_from_slice(parameters);
    let sum = checksum(&frame);
    frame.push(sum);
    frame.push(TAIL);
    Ok(frame)
}

/// Check header, tail, and optionally checksum of a complete frame of any length
fn validate_envelope(bytes: &[u8], verify_checksum: bool) -> Result<(), ProtocolError> {
    if bytes.len() < REPLY_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame of {} bytes is shorter than {}",
            bytes.len(),
            REPLY_LEN
        )));
    }
    if bytes[..HEADER.len()] != HEADER {
        return Err(ProtocolError::MalformedFrame(format!(
            "bad header {:02x?}",
            &bytes[..HEADER.len()]
        )));
    }
    let tail = bytes[bytes.len() - 1];
    if tail != TAIL {
        return Err(ProtocolError::MalformedFrame(format!(
            "bad tail {:#04x}",
            tail
        )));
    }
    if verify_checksum {
        let body = &bytes[..bytes.len() - 2];
        let expected = checksum(body);
        let actual = bytes[bytes.len() - 2];
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }
    }
    Ok(())
}

/// Decode a 13-byte reply
pub fn decode(bytes: &[u8], verify_checksum: bool) -> Result<Response, ProtocolError> {
    if bytes.len() != REPLY_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "expected {} bytes, got {}",
            REPLY_LEN,
            bytes.len()
        )));
    }
    validate_envelope(bytes, verify_checksum)?;

    let mut parameters = [0u8; PARAM_LEN];
    parameters.copy_from_slice(&bytes[STATUS_OFFSET..STATUS_OFFSET + PARAM_LEN]);
    Ok(Response {
        opcode: bytes[4],
        parameters,
        checksum: bytes[REPLY_LEN - 2],
    })
}

/// Decode a TAKEPIC reply into the image size and packet count
pub fn decode_capture_reply(
    bytes: &[u8],
    verify_checksum: bool,
) -> Result<CaptureResult, ProtocolError> {
    let response = decode(bytes, verify_checksum)?;
    if !response.is_ok() {
        return Err(ProtocolError::DeviceError {
            opcode: response.opcode,
            status: response.status(),
        });
    }

    // Total length: bytes 6..9, packet count: bytes 9..11
    let payload = response.payload();
    Ok(CaptureResult {
        total_bytes: BigEndian::read_u24(&payload[0..3]),
        packet_count: BigEndian::read_u16(&payload[3..5]),
    })
}

/// Validate an upload reply and return its image payload
pub fn decode_packet_reply(
    bytes: &[u8],
    expected_len: usize,
    verify_checksum: bool,
) -> Result<&[u8], ProtocolError> {
    if bytes.len() != REPLY_LEN + expected_len {
        return Err(ProtocolError::MalformedFrame(format!(
            "upload reply of {} bytes, expected {}",
            bytes.len(),
            REPLY_LEN + expected_len
        )));
    }
    validate_envelope(bytes, verify_checksum)?;
    Ok(&bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + expected_len])
}

/// Build a well-formed reply frame around an image payload
pub fn encode_packet_reply(parameters: &[u8; PARAM_LEN], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REPLY_LEN + payload.len());
    frame.extend_from_slice(&HEADER);
    frame.push(super::Opcode::Upload.byte());
    frame.extend_from_slice(parameters);
    frame.extend_from_slice(payload);
    let sum = checksum(&frame);
    frame.push(sum);
    frame.push(TAIL);
    frame
}

/// Format bytes as space separated hex for logs
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
