//! Session management
//!
//! Sequences the packet-protocol camera through
//! configure → version → focus → capture → upload → reset against one
//! exclusively owned transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::commands::config_parameters;
use super::frame::{self, hex, CaptureResult, Response};
use super::transfer::{ChunkedTransfer, TransferOutcome};
use super::{
    BaudRate, CaptureSettings, FocusMode, Opcode, PacketSize, ProtocolError, SerialTransport,
    Transport, DEFAULT_BAUD_RATE, DEFAULT_PACKET_SIZE, REPLY_LEN,
};
use crate::config::{DeviceFamily, SessionConfig};
use crate::protocol::framebuffer::FramebufferSession;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport not configured (fresh) or released after an abort
    Disconnected,
    /// CONFIG exchange in progress
    Configuring,
    /// Idle and configured
    Ready,
    /// FOCUS exchange in progress
    Focusing,
    /// TAKEPIC exchange in progress
    Capturing,
    /// Packet upload in progress
    Uploading,
    /// Restoring default link parameters
    Resetting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Configuring => "configuring",
            SessionState::Ready => "ready",
            SessionState::Focusing => "focusing",
            SessionState::Capturing => "capturing",
            SessionState::Uploading => "uploading",
            SessionState::Resetting => "resetting",
        };
        f.write_str(name)
    }
}

/// A camera session the driver can run without knowing the device family
pub trait CameraSession {
    /// Current state
    fn state(&self) -> SessionState;

    /// Run the full acquisition sequence and return the image
    fn acquire(&mut self) -> Result<TransferOutcome, ProtocolError>;

    /// Release the transport
    fn close(&mut self);
}

/// Open a serial session for the device family selected in `config`
pub fn open_session(config: SessionConfig) -> Result<Box<dyn CameraSession>, ProtocolError> {
    config.validate()?;
    match config.family {
        DeviceFamily::Packet => Ok(Box::new(ProtocolSession::open(config)?)),
        DeviceFamily::Framebuffer => Ok(Box::new(FramebufferSession::open(config)?)),
    }
}

/// Packet-protocol camera session
pub struct ProtocolSession<T: Transport> {
    /// Exclusively owned transport
    transport: T,
    /// Session configuration
    config: SessionConfig,
    /// Current state
    state: SessionState,
    /// Packet size the camera was last configured with
    packet_size: PacketSize,
    /// Result of the most recent capture, consumed by `upload`
    last_capture: Option<CaptureResult>,
}

impl ProtocolSession<SerialTransport> {
    /// Open the configured serial port at the initial baud rate
    pub fn open(config: SessionConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::open(
            &config.port_name,
            config.initial_baud,
            Duration::from_millis(config.timeout_ms),
        )?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> ProtocolSession<T> {
    /// Wrap an open transport. The session starts `Disconnected` until configured.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            // Power-up default of the camera
            packet_size: PacketSize::P512,
            last_capture: None,
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Packet size currently configured on the camera
    pub fn packet_size(&self) -> PacketSize {
        self.packet_size
    }

    /// Result of the most recent successful capture
    pub fn last_capture(&self) -> Option<CaptureResult> {
        self.last_capture
    }

    /// Borrow the transport (diagnostics and tests)
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Release the transport; the session is unusable afterwards
    pub fn close(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
        self.last_capture = None;
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), ProtocolError> {
        if !self.transport.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Run `op` in `working` state; success returns to `Ready`, failure aborts the session
    fn run<R>(
        &mut self,
        operation: &'static str,
        working: SessionState,
        op: impl FnOnce(&mut Self) -> Result<R, ProtocolError>,
    ) -> Result<R, ProtocolError> {
        self.state = working;
        match op(self) {
            Ok(value) => {
                self.state = SessionState::Ready;
                Ok(value)
            }
            Err(e) => {
                warn!("{} failed, closing session: {}", operation, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Send one command and read its 13-byte reply
    fn exchange(&mut self, opcode: Opcode, parameters: &[u8; 6]) -> Result<(Vec<u8>, Response), ProtocolError> {
        let request = frame::encode(opcode.byte(), parameters)?;
        debug!("{:?} request: {}", opcode, hex(&request));
        self.transport.write_frame(&request)?;

        let reply = self.transport.read_exact(REPLY_LEN)?;
        debug!("{:?} reply: {}", opcode, hex(&reply));
        let response = frame::decode(&reply, self.config.verify_checksums)?;
        Ok((reply, response))
    }

    /// Like `exchange`, but a nonzero status is a `DeviceError`
    fn command(&mut self, opcode: Opcode, parameters: &[u8; 6]) -> Result<(Vec<u8>, Response), ProtocolError> {
        let (reply, response) = self.exchange(opcode, parameters)?;
        if !response.is_ok() {
            return Err(ProtocolError::DeviceError {
                opcode: response.opcode,
                status: response.status(),
            });
        }
        Ok((reply, response))
    }

    /// Send CONFIG, drain its reply at the current rate, then switch rate
    fn apply_link_config(&mut self, baud: BaudRate, packet_size: PacketSize) -> Result<(), ProtocolError> {
        let parameters = config_parameters(baud, packet_size);
        self.command(Opcode::Config, &parameters)?;

        // The whole reply was read at the old rate; only now may the rate change
        if self.transport.baud() != baud {
            self.transport.set_baud(baud)?;
        }
        self.packet_size = packet_size;
        info!("link configured: {} baud, {}-byte packets", baud, packet_size.bytes());
        Ok(())
    }

    /// Configure link speed and packet size
    pub fn configure(&mut self, baud: BaudRate, packet_size: PacketSize) -> Result<(), ProtocolError> {
        self.require("configure", &[SessionState::Disconnected, SessionState::Ready])?;
        self.run("configure", SessionState::Configuring, |s| {
            s.apply_link_config(baud, packet_size)
        })
    }

    /// Query firmware info; returns the raw reply for diagnostics
    pub fn get_version(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.require("get version", &[SessionState::Ready])?;
        self.run("get version", SessionState::Ready, |s| {
            let (reply, _) = s.command(Opcode::GetVersion, &[0; 6])?;
            info!("camera info: {}", hex(&reply));
            Ok(reply)
        })
    }

    /// Focus the lens. `manual_value` (0..=750) is only used in manual mode.
    pub fn autofocus(&mut self, mode: FocusMode, manual_value: u16) -> Result<Response, ProtocolError> {
        self.require("autofocus", &[SessionState::Ready])?;
        let parameters = mode.parameters(manual_value)?;
        self.run("autofocus", SessionState::Focusing, |s| {
            let (_, response) = s.command(Opcode::Focus, &parameters)?;
            debug!("focus reply payload: {}", hex(response.payload()));
            Ok(response)
        })
    }

    /// Take a picture; the camera answers with the image size and packet count
    pub fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureResult, ProtocolError> {
        self.require("capture", &[SessionState::Ready])?;
        let parameters = settings.parameters()?;
        self.run("capture", SessionState::Capturing, |s| {
            let (reply, response) = s.exchange(Opcode::TakePicture, &parameters)?;
            if !response.is_ok() {
                return Err(ProtocolError::CaptureFailed {
                    status: response.status(),
                });
            }
            let result = frame::decode_capture_reply(&reply, s.config.verify_checksums)?;
            info!(
                "captured {} bytes in {} packets",
                result.total_bytes, result.packet_count
            );
            s.last_capture = Some(result);
            Ok(result)
        })
    }

    /// Read the last captured image packet by packet
    pub fn upload(&mut self) -> Result<TransferOutcome, ProtocolError> {
        self.require("upload", &[SessionState::Ready])?;
        let capture = self.last_capture.take().ok_or(ProtocolError::InvalidState {
            operation: "upload",
            state: "ready without a capture".to_string(),
        })?;

        let packet_size = self.packet_size;
        let policy = self.config.failure_policy;
        let retries = self.config.upload_retries;
        let verify = self.config.verify_checksums;
        self.run("upload", SessionState::Uploading, |s| {
            ChunkedTransfer::new(&mut s.transport)
                .policy(policy)
                .retries(retries)
                .verify_checksum(verify)
                .upload(capture.total_bytes, capture.packet_count, packet_size)
        })
    }

    /// Restore the camera's default link (115200 baud, 512-byte packets)
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.require("reset", &[SessionState::Ready])?;
        let baud = BaudRate::from_rate(DEFAULT_BAUD_RATE)?;
        let packet_size = PacketSize::from_bytes(DEFAULT_PACKET_SIZE)?;
        self.run("reset", SessionState::Resetting, |s| {
            s.apply_link_config(baud, packet_size)
        })
    }

    /// Full sequence: configure → version → focus → capture → upload → reset
    pub fn acquire(&mut self) -> Result<TransferOutcome, ProtocolError> {
        let config = self.config.clone();
        self.configure(config.target_baud, config.packet_size)?;
        self.get_version()?;
        self.autofocus(config.focus_mode, config.focus_value)?;
        self.capture(&config.capture)?;
        let outcome = self.upload()?;

        // The image is already in hand; a failed reset only costs the link defaults
        if let Err(e) = self.reset() {
            warn!("reset after upload failed: {}", e);
        }
        Ok(outcome)
    }
}

impl<T: Transport> CameraSession for ProtocolSession<T> {
    fn state(&self) -> SessionState {
        self.state
    }

    fn acquire(&mut self) -> Result<TransferOutcome, ProtocolError> {
        ProtocolSession::acquire(self)
    }

    fn close(&mut self) {
        ProtocolSession::close(self)
    }
}

impl<T: Transport> Drop for ProtocolSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::Uploading.to_string(), "uploading");
    }

    #[test]
    fn test_open_session_rejects_missing_port() {
        let config = SessionConfig {
            port_name: "/dev/camlink-does-not-exist".to_string(),
            ..SessionConfig::default()
        };
        assert!(open_session(config).is_err());
    }
}
