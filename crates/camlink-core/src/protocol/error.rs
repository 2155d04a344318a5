//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Opening or driving the serial port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Fewer bytes than expected arrived before the deadline
    #[error("Read timeout: expected {expected} bytes, got {received}")]
    Timeout {
        /// Bytes requested
        expected: usize,
        /// Bytes that arrived
        received: usize,
    },

    /// The transport was closed
    #[error("Not connected to camera")]
    NotConnected,

    /// Wrong length, header, tail, or reply opcode
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The camera answered with a nonzero status
    #[error("Camera returned status {status:#04x} for opcode {opcode:#04x}")]
    DeviceError {
        /// Opcode of the failed command
        opcode: u8,
        /// Status byte reported
        status: u8,
    },

    /// Reply checksum does not match its contents
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    /// The camera could not take the picture
    #[error("Capture failed with status {status:#04x}")]
    CaptureFailed {
        /// Status byte reported
        status: u8,
    },

    /// Operation called in a state that does not allow it
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was refused
        operation: &'static str,
        /// State the session was in
        state: String,
    },

    /// Argument outside the range the camera accepts
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Rate missing from the camera's code table
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Size missing from the camera's code table
    #[error("Unsupported packet size: {0}")]
    UnsupportedPacketSize(u32),

    /// Baud change attempted with reply bytes still unread
    #[error("Refusing to change baud rate with {pending} unread bytes at the old rate")]
    UnreadDataOnBaudSwitch {
        /// Unread bytes at the old rate
        pending: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether a failed read can be re-requested without resynchronising the link
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }
}
