//! Demo Mode - Simulated camera for running without hardware
//!
//! [`SimulatedCamera`] implements [`Transport`] with an in-memory model of
//! both camera families. Replies are queued as soon as a request is written,
//! so every protocol ordering rule applies exactly as on a real link:
//! changing the host baud with reply bytes still queued is refused, and a
//! host that stays on the old baud after a CONFIG is no longer understood.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{DeviceFamily, SessionConfig};
use crate::protocol::frame::{self, hex};
use crate::protocol::framebuffer::{self as fbuf, opcode, FramebufferSession};
use crate::protocol::transfer::{expected_packet_len, packet_count_for};
use crate::protocol::{
    BaudRate, CameraSession, Opcode, PacketSize, ProtocolError, ProtocolSession, Transport,
};

/// Image size produced when none is configured
pub const DEFAULT_IMAGE_LEN: usize = 3000;

/// Firmware string reported by the framebuffer family
const FBUF_VERSION: &[u8] = b"VC0703 1.00";

/// In-memory camera behind the [`Transport`] trait
pub struct SimulatedCamera {
    family: DeviceFamily,
    /// Rate the host side of the link is set to
    host_baud: BaudRate,
    /// Rate the camera listens at
    device_baud: BaudRate,
    open: bool,
    /// Reply bytes not yet read by the host
    pending: VecDeque<u8>,
    packet_size: PacketSize,
    image_len: usize,
    image: Vec<u8>,
    rng: StdRng,
    /// Upload indices the camera never answers
    dropped: BTreeSet<u16>,
    focus_position: u16,
    /// Opcodes of every request the camera understood
    received: Vec<u8>,
}

impl SimulatedCamera {
    /// Create a camera of `family` listening at `baud`
    pub fn new(family: DeviceFamily, baud: BaudRate) -> Self {
        Self {
            family,
            host_baud: baud,
            device_baud: baud,
            open: true,
            pending: VecDeque::new(),
            packet_size: PacketSize::P512,
            image_len: DEFAULT_IMAGE_LEN,
            image: Vec::new(),
            rng: StdRng::seed_from_u64(0x0CA3_E7A5),
            dropped: BTreeSet::new(),
            focus_position: 0,
            received: Vec::new(),
        }
    }

    /// Size of the images this camera captures
    pub fn with_image_len(mut self, len: usize) -> Self {
        self.image_len = len;
        self
    }

    /// Never answer upload requests for packet `index`
    pub fn drop_packet(mut self, index: u16) -> Self {
        self.dropped.insert(index);
        self
    }

    /// Reseed the pseudo-image generator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Rate the camera itself is listening at
    pub fn device_baud(&self) -> BaudRate {
        self.device_baud
    }

    /// Packet size the camera was configured with
    pub fn packet_size(&self) -> PacketSize {
        self.packet_size
    }

    /// The most recently captured image
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Opcodes of the requests the camera understood, in order
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    fn capture_image(&mut self) {
        let mut image = vec![0u8; self.image_len];
        self.rng.fill(image.as_mut_slice());
        self.image = image;
    }

    fn queue(&mut self, bytes: &[u8]) {
        trace!("sim reply: {}", hex(bytes));
        self.pending.extend(bytes.iter().copied());
    }

    fn handle_packet_request(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let request = frame::decode(bytes, true)?;
        let params = request.parameters;
        self.received.push(request.opcode);

        let reply = match Opcode::from_byte(request.opcode) {
            Some(Opcode::GetVersion) => frame::encode(request.opcode, &[0x00, 0x01, 0x02, 0, 0, 0])?,
            Some(Opcode::Config) => {
                match (BaudRate::from_code(params[0]), PacketSize::from_code(params[2])) {
                    (Some(baud), Some(size)) => {
                        let reply = frame::encode(request.opcode, &[0x00, params[0], 0, params[2], 0, 0])?;
                        self.queue(&reply);
                        // The camera answers at the old rate, then switches
                        self.device_baud = baud;
                        self.packet_size = size;
                        debug!("sim camera now at {} baud, {}-byte packets", baud, size.bytes());
                        return Ok(());
                    }
                    _ => frame::encode(request.opcode, &[0x01, 0, 0, 0, 0, 0])?,
                }
            }
            Some(Opcode::Focus) => {
                self.focus_position = match params[0] {
                    0x01 => 375,
                    0x03 => u16::from_be_bytes([params[1], params[2]]),
                    _ => self.focus_position,
                };
                let [hi, lo] = self.focus_position.to_be_bytes();
                frame::encode(request.opcode, &[0x00, hi, lo, 0, 0, 0])?
            }
            Some(Opcode::TakePicture) => {
                self.capture_image();
                let len = self.image.len() as u32;
                let count = packet_count_for(len, self.packet_size.bytes()) as u16;
                let len_bytes = len.to_be_bytes();
                let [count_hi, count_lo] = count.to_be_bytes();
                frame::encode(
                    request.opcode,
                    &[0x00, len_bytes[1], len_bytes[2], len_bytes[3], count_hi, count_lo],
                )?
            }
            Some(Opcode::Upload) => {
                let index = u16::from_be_bytes([params[1], params[2]]);
                let count = u16::from_be_bytes([params[3], params[4]]);
                if self.dropped.contains(&index) || index == 0 || index > count {
                    debug!("sim camera ignoring upload of packet {}", index);
                    return Ok(());
                }
                let size = self.packet_size.bytes();
                let start = (usize::from(index) - 1) * size as usize;
                let len = expected_packet_len(index, count, self.image.len() as u32, size);
                let end = (start + len).min(self.image.len());
                let payload = self.image.get(start..end).unwrap_or_default().to_vec();
                frame::encode_packet_reply(&params, &payload)
            }
            None => frame::encode(request.opcode, &[0xFF, 0, 0, 0, 0, 0])?,
        };
        self.queue(&reply);
        Ok(())
    }

    fn handle_framebuffer_request(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.len() < 4 || bytes[0] != fbuf::REQUEST_MARK || bytes[1] != fbuf::SERIAL_ID {
            return Err(ProtocolError::MalformedFrame(format!(
                "sim camera cannot parse {}",
                hex(bytes)
            )));
        }
        let op = bytes[2];
        let params = &bytes[4..];
        self.received.push(op);

        let ack = [fbuf::REPLY_MARK, fbuf::SERIAL_ID, op, 0x00, 0x00];
        match op {
            opcode::GET_VERSION => {
                let mut reply = vec![fbuf::REPLY_MARK, fbuf::SERIAL_ID, op, 0x00, FBUF_VERSION.len() as u8];
                reply.extend_from_slice(FBUF_VERSION);
                self.queue(&reply);
            }
            opcode::SET_BAUD => {
                let target = BaudRate::ALL.into_iter().find(|b| {
                    fbuf::baud_divisor(*b)
                        .map(|d| params.len() == 3 && d == [params[1], params[2]])
                        .unwrap_or(false)
                });
                match target {
                    Some(baud) => {
                        self.queue(&ack);
                        self.device_baud = baud;
                    }
                    None => self.queue(&[fbuf::REPLY_MARK, fbuf::SERIAL_ID, op, 0x03, 0x00]),
                }
            }
            opcode::RESIZE => self.queue(&ack),
            opcode::FBUF_CTRL => {
                if params.first() == Some(&0x00) {
                    self.capture_image();
                }
                self.queue(&ack);
            }
            opcode::GET_FBUF_LEN => {
                let mut reply = vec![fbuf::REPLY_MARK, fbuf::SERIAL_ID, op, 0x00, 0x04];
                reply.extend_from_slice(&(self.image.len() as u32).to_be_bytes());
                self.queue(&reply);
            }
            opcode::READ_FBUF => {
                self.queue(&ack);
                let image = self.image.clone();
                self.queue(&image);
                self.queue(&ack);
            }
            _ => self.queue(&[fbuf::REPLY_MARK, fbuf::SERIAL_ID, op, 0x01, 0x00]),
        }
        Ok(())
    }
}

impl Transport for SimulatedCamera {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        trace!("sim request: {}", hex(bytes));
        if self.host_baud != self.device_baud {
            // Bytes at the wrong rate arrive as line noise; the camera stays silent
            debug!(
                "sim camera at {} baud ignored a frame sent at {}",
                self.device_baud, self.host_baud
            );
            return Ok(());
        }
        match self.family {
            DeviceFamily::Packet => self.handle_packet_request(bytes),
            DeviceFamily::Framebuffer => self.handle_framebuffer_request(bytes),
        }
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        if self.pending.len() < n {
            let received = self.pending.len();
            self.pending.clear();
            return Err(ProtocolError::Timeout { expected: n, received });
        }
        Ok(self.pending.drain(..n).collect())
    }

    fn set_baud(&mut self, baud: BaudRate) -> Result<(), ProtocolError> {
        if !self.pending.is_empty() {
            return Err(ProtocolError::UnreadDataOnBaudSwitch {
                pending: self.pending.len(),
            });
        }
        self.host_baud = baud;
        Ok(())
    }

    fn baud(&self) -> BaudRate {
        self.host_baud
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.pending.clear();
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, ProtocolError> {
        Ok(self.pending.len())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn settle(&mut self, _delay: Duration) {}
}

/// Session against a simulated camera of the configured family
pub fn demo_session(config: SessionConfig) -> Result<Box<dyn CameraSession>, ProtocolError> {
    config.validate()?;
    let camera = SimulatedCamera::new(config.family, config.initial_baud);
    match config.family {
        DeviceFamily::Packet => Ok(Box::new(ProtocolSession::new(camera, config))),
        DeviceFamily::Framebuffer => Ok(Box::new(FramebufferSession::new(camera, config))),
    }
}
