//! Framebuffer-streaming protocol
//!
//! The older camera family has no packet index and no checksum. The host
//! freezes the framebuffer, asks for its length and pulls the whole image in
//! one read, then resumes the framebuffer so the device resets its read
//! pointer.
//!
//! Request: `56 00 <opcode> <len> <params...>`
//! Reply:   `76 00 <opcode> <status> <len> <data...>`

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::frame::hex;
use super::session::{CameraSession, SessionState};
use super::transfer::{ImageBuffer, TransferOutcome};
use super::{BaudRate, ProtocolError, SerialTransport, Transport};
use crate::config::SessionConfig;

/// First byte of every request
pub const REQUEST_MARK: u8 = 0x56;
/// First byte of every reply
pub const REPLY_MARK: u8 = 0x76;
/// Serial number byte (single camera on the link)
pub const SERIAL_ID: u8 = 0x00;

/// Length of a control reply
pub const CONTROL_REPLY_LEN: usize = 5;
/// Length of the framebuffer length reply
pub const LENGTH_REPLY_LEN: usize = 9;
/// Length of the version reply
pub const VERSION_REPLY_LEN: usize = 16;

/// Delay around the bulk read before the device is ready to continue
pub const SETTLE_DELAY: Duration = Duration::from_millis(30);

/// Opcodes of the framebuffer protocol
pub mod opcode {
    /// Firmware version string
    pub const GET_VERSION: u8 = 0x11;
    /// Change the link speed
    pub const SET_BAUD: u8 = 0x24;
    /// Set the picture size
    pub const RESIZE: u8 = 0x31;
    /// Stream framebuffer contents
    pub const READ_FBUF: u8 = 0x32;
    /// Length of the frozen frame
    pub const GET_FBUF_LEN: u8 = 0x34;
    /// Stop or resume frame updates
    pub const FBUF_CTRL: u8 = 0x36;
}

/// FBUF_CTRL: stop the current frame
const FBUF_STOP: u8 = 0x00;
/// FBUF_CTRL: resume frame updates and rewind the read pointer
const FBUF_RESUME: u8 = 0x02;

/// Picture size of the framebuffer family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    /// 640x480
    Large,
    /// 320x240
    #[default]
    Small,
}

impl ImageSize {
    /// Size byte of the RESIZE command
    pub fn code(&self) -> u8 {
        match self {
            ImageSize::Large => 0x00,
            ImageSize::Small => 0x11,
        }
    }
}

/// Two-byte divisor codes for SET_BAUD; faster rates are not supported by this family
pub fn baud_divisor(baud: BaudRate) -> Result<[u8; 2], ProtocolError> {
    match baud {
        BaudRate::B9600 => Ok([0xAE, 0xC8]),
        BaudRate::B19200 => Ok([0x56, 0xE4]),
        BaudRate::B38400 => Ok([0x2A, 0xF2]),
        BaudRate::B57600 => Ok([0x1C, 0x4C]),
        BaudRate::B115200 => Ok([0x0D, 0xA6]),
        other => Err(ProtocolError::UnsupportedBaudRate(other.as_u32())),
    }
}

/// Largest image the 3-byte length field can describe
pub const MAX_FRAME_LEN: u32 = 0x00FF_FFFF;

/// Encode a request frame
pub fn encode(opcode: u8, parameters: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u8::try_from(parameters.len()).map_err(|_| {
        ProtocolError::InvalidParameter(format!(
            "opcode {:#04x} takes at most 255 parameter bytes, got {}",
            opcode,
            parameters.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(4 + parameters.len());
    frame.push(REQUEST_MARK);
    frame.push(SERIAL_ID);
    frame.push(opcode);
    frame.push(len);
    frame.extend_from_slice(parameters);
    Ok(frame)
}

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Opcode echoed by the device
    pub opcode: u8,
    /// Status byte (0 = success)
    pub status: u8,
    /// Bytes following the length byte
    pub data: Vec<u8>,
}

/// Decode a reply to `opcode`; a nonzero status is a `DeviceError`
pub fn decode(bytes: &[u8], opcode: u8) -> Result<Reply, ProtocolError> {
    let reply = decode_unchecked(bytes, opcode)?;
    if reply.status != 0 {
        return Err(ProtocolError::DeviceError {
            opcode,
            status: reply.status,
        });
    }
    Ok(reply)
}

/// Decode a reply without interpreting the status byte
pub fn decode_unchecked(bytes: &[u8], opcode: u8) -> Result<Reply, ProtocolError> {
    if bytes.len() < CONTROL_REPLY_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "reply of {} bytes is shorter than {}",
            bytes.len(),
            CONTROL_REPLY_LEN
        )));
    }
    if bytes[0] != REPLY_MARK || bytes[1] != SERIAL_ID || bytes[2] != opcode {
        return Err(ProtocolError::MalformedFrame(format!(
            "unexpected reply {} to opcode {:#04x}",
            hex(&bytes[..CONTROL_REPLY_LEN]),
            opcode
        )));
    }
    Ok(Reply {
        opcode,
        status: bytes[3],
        data: bytes[CONTROL_REPLY_LEN..].to_vec(),
    })
}

/// Parse the framebuffer length from a 9-byte GET_FBUF_LEN reply
pub fn decode_length_reply(bytes: &[u8]) -> Result<u32, ProtocolError> {
    if bytes.len() != LENGTH_REPLY_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "length reply of {} bytes, expected {}",
            bytes.len(),
            LENGTH_REPLY_LEN
        )));
    }
    let reply = decode(bytes, opcode::GET_FBUF_LEN)?;
    let len = BigEndian::read_u32(&reply.data);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "framebuffer length {:#x} exceeds {:#x}",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

/// READ_FBUF parameters: current frame, transfer by UART, from address 0
pub fn read_parameters(length: u32, delay: u16) -> Vec<u8> {
    let mut params = vec![0x00, 0x0A, 0x00, 0x00, 0x00, 0x00];
    params.extend_from_slice(&length.to_be_bytes());
    params.extend_from_slice(&delay.to_be_bytes());
    params
}

/// Framebuffer-protocol camera session
pub struct FramebufferSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    /// Framebuffer length reported after the last freeze
    frame_len: Option<u32>,
}

impl FramebufferSession<SerialTransport> {
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

impl<T: Transport> FramebufferSession<T> {
    /// Wrap an open transport
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Disconnected,
            frame_len: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Borrow the transport (diagnostics and tests)
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport
    pub fn close(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
        self.frame_len = None;
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), ProtocolError> {
        if !self.transport.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        if !allowed.contains(&self.state) {
            return Err(ProtocolError::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn run<R>(
        &mut self,
        operation: &'static str,
        working: SessionState,
        op: impl FnOnce(&mut Self) -> Result<R, ProtocolError>,
    ) -> Result<R, ProtocolError> {
        self.state = working;
        let result = op(self);
        match &result {
            Ok(_) => self.state = SessionState::Ready,
            Err(e) => {
                warn!("{} failed, closing session: {}", operation, e);
                self.close();
            }
        }
        result
    }

    fn exchange(&mut self, opcode: u8, parameters: &[u8], reply_len: usize) -> Result<Vec<u8>, ProtocolError> {
        let request = encode(opcode, parameters)?;
        debug!("fbuf request: {}", hex(&request));
        self.transport.write_frame(&request)?;
        let reply = self.transport.read_exact(reply_len)?;
        debug!("fbuf reply: {}", hex(&reply));
        Ok(reply)
    }

    /// Change the link speed; the ack is read at the old rate first
    pub fn set_baud(&mut self, baud: BaudRate) -> Result<(), ProtocolError> {
        self.require("set baud", &[SessionState::Disconnected, SessionState::Ready])?;
        let divisor = baud_divisor(baud)?;
        self.run("set baud", SessionState::Configuring, |s| {
            let reply = s.exchange(opcode::SET_BAUD, &[0x01, divisor[0], divisor[1]], CONTROL_REPLY_LEN)?;
            decode(&reply, opcode::SET_BAUD)?;
            s.transport.set_baud(baud)?;
            info!("link switched to {} baud", baud);
            Ok(())
        })
    }

    /// Query the firmware version string
    pub fn get_version(&mut self) -> Result<String, ProtocolError> {
        self.require("get version", &[SessionState::Disconnected, SessionState::Ready])?;
        self.run("get version", SessionState::Configuring, |s| {
            let reply = s.exchange(opcode::GET_VERSION, &[], VERSION_REPLY_LEN)?;
            let reply = decode(&reply, opcode::GET_VERSION)?;
            let version = String::from_utf8_lossy(&reply.data).trim().to_string();
            info!("camera version: {}", version);
            Ok(version)
        })
    }

    /// Set the picture size
    pub fn resize(&mut self, size: ImageSize) -> Result<(), ProtocolError> {
        self.require("resize", &[SessionState::Ready])?;
        self.run("resize", SessionState::Configuring, |s| {
            let reply = s.exchange(
                opcode::RESIZE,
                &[0x04, 0x01, 0x00, 0x19, size.code()],
                CONTROL_REPLY_LEN,
            )?;
            decode(&reply, opcode::RESIZE)?;
            info!("image size set to {:?}", size);
            Ok(())
        })
    }

    /// Freeze the framebuffer and read its length
    pub fn capture(&mut self) -> Result<u32, ProtocolError> {
        self.require("capture", &[SessionState::Ready])?;
        self.run("capture", SessionState::Capturing, |s| {
            let reply = s.exchange(opcode::FBUF_CTRL, &[FBUF_STOP], CONTROL_REPLY_LEN)?;
            decode(&reply, opcode::FBUF_CTRL).map_err(|e| match e {
                ProtocolError::DeviceError { status, .. } => ProtocolError::CaptureFailed { status },
                other => other,
            })?;

            let reply = s.exchange(opcode::GET_FBUF_LEN, &[0x00], LENGTH_REPLY_LEN)?;
            let len = decode_length_reply(&reply)?;
            info!("framebuffer holds {} bytes", len);
            s.frame_len = Some(len);
            Ok(len)
        })
    }

    /// Pull the frozen image in a single read
    pub fn upload(&mut self) -> Result<TransferOutcome, ProtocolError> {
        self.require("upload", &[SessionState::Ready])?;
        let len = self.frame_len.take().ok_or(ProtocolError::InvalidState {
            operation: "upload",
            state: "ready without a capture".to_string(),
        })?;

        // One read must cover the whole image at the current link speed (10 bits per byte)
        let base = Duration::from_millis(self.config.timeout_ms);
        let wire_time = Duration::from_millis(u64::from(len) * 10_000 / u64::from(self.transport.baud().as_u32()));
        let bulk_timeout = base + wire_time;

        self.run("upload", SessionState::Uploading, |s| {
            let reply = s.exchange(opcode::READ_FBUF, &read_parameters(len, 0), CONTROL_REPLY_LEN)?;
            decode(&reply, opcode::READ_FBUF)?;

            s.transport.settle(SETTLE_DELAY);
            s.transport.set_timeout(bulk_timeout)?;
            let image = s.transport.read_exact(len as usize);
            s.transport.set_timeout(base)?;
            let image = image?;
            s.transport.settle(SETTLE_DELAY);

            // Trailing frame marks the end of the bulk data; the image is already in hand
            let trailer = s
                .transport
                .read_exact(CONTROL_REPLY_LEN)
                .and_then(|bytes| decode_unchecked(&bytes, opcode::READ_FBUF));
            match trailer {
                Ok(trailer) if trailer.status != 0 => {
                    warn!("read trailer reported status {:#04x}", trailer.status)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("read trailer missing: {}", e);
                    s.transport.clear_input()?;
                }
            }

            info!("read {} framebuffer bytes", image.len());
            Ok(TransferOutcome::new(
                ImageBuffer::from_bytes(image, len as usize),
                Vec::new(),
            ))
        })
    }

    /// Resume the framebuffer, rewinding the device's read pointer
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.require("reset", &[SessionState::Ready])?;
        self.run("reset", SessionState::Resetting, |s| {
            let reply = s.exchange(opcode::FBUF_CTRL, &[FBUF_RESUME], CONTROL_REPLY_LEN)?;
            decode(&reply, opcode::FBUF_CTRL)?;
            Ok(())
        })
    }

    /// Full sequence: baud → version → resize → capture → upload → reset
    pub fn acquire(&mut self) -> Result<TransferOutcome, ProtocolError> {
        if self.transport.baud() != self.config.target_baud {
            self.set_baud(self.config.target_baud)?;
        }
        self.get_version()?;
        self.resize(self.config.image_size)?;
        self.capture()?;
        let outcome = self.upload()?;

        // A failed resume only leaves the frame frozen
        if let Err(e) = self.reset() {
            warn!("framebuffer resume after upload failed: {}", e);
        }
        Ok(outcome)
    }
}

impl<T: Transport> CameraSession for FramebufferSession<T> {
    fn state(&self) -> SessionState {
        self.state
    }

    fn acquire(&mut self) -> Result<TransferOutcome, ProtocolError> {
        FramebufferSession::acquire(self)
    }

    fn close(&mut self) {
        FramebufferSession::close(self)
    }
}

impl<T: Transport> Drop for FramebufferSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}
