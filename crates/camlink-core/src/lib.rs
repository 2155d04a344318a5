//! # CamLink Core Library
//!
//! Drives UART camera modules over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding with checksum validation
//! - Chunked, index-sequenced image upload
//! - A session state machine that orders link reconfiguration safely
//! - The older framebuffer-streaming protocol behind the same session trait
//! - A simulated camera for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlink_core::prelude::*;
//!
//! let config = SessionConfig::packet("/dev/ttyUSB0");
//! let mut session = open_session(config)?;
//! let outcome = session.acquire()?;
//! if let Some(warning) = &outcome.incomplete {
//!     eprintln!("{}", warning);
//! }
//! FileSink::new("captures").persist(outcome.buffer, "photo.jpg")?;
//! ```

pub mod config;
pub mod demo;
pub mod protocol;
pub mod sink;

pub use protocol::open_session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DeviceFamily, SessionConfig};
    pub use crate::demo::{demo_session, SimulatedCamera};
    pub use crate::open_session;
    pub use crate::protocol::{
        BaudRate, CameraSession, CaptureResult, CaptureSettings, FocusMode, FramebufferSession,
        ImageBuffer, PacketFailurePolicy, PacketSize, ProtocolError, ProtocolSession,
        SessionState, TransferIncomplete, TransferOutcome, Transport,
    };
    pub use crate::sink::{default_image_name, FileSink, ImageSink, SinkError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
