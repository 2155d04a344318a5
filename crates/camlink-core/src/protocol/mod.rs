//! Serial Protocol Communication
//!
//! Implements the UART camera protocols.
//!
//! Supports the checksummed packet protocol (indexed chunked upload) and the
//! older framebuffer-streaming protocol without checksums.

pub mod commands;
mod error;
pub mod frame;
pub mod framebuffer;
pub mod serial;
mod session;
pub mod transfer;
pub mod transport;

pub use commands::{BaudRate, CaptureSettings, FocusMode, ImageFormat, Opcode, PacketSize};
pub use error::ProtocolError;
pub use frame::{CaptureResult, Response};
pub use framebuffer::{FramebufferSession, ImageSize};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use session::{open_session, CameraSession, ProtocolSession, SessionState};
pub use transfer::{
    ChunkedTransfer, ImageBuffer, PacketFailurePolicy, TransferIncomplete, TransferOutcome,
};
pub use transport::{SerialTransport, Transport};

/// Default baud rate of the camera after power-up
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default packet size restored by a session reset
pub const DEFAULT_PACKET_SIZE: u32 = 512;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1200;

/// Size of every non-upload reply of the packet protocol
pub const REPLY_LEN: usize = 13;
