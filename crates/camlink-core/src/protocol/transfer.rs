//! Chunked image upload
//!
//! After a capture the camera holds the image and hands it out in numbered
//! packets. Each packet is requested with an UPLOAD command carrying the
//! 1-based packet index and the total packet count; the reply wraps
//! `expected_len` payload bytes in the usual 13-byte envelope.
//!
//! The protocol has no acknowledgement or resend primitive, so a packet that
//! fails can only be re-requested (bounded retries) or skipped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use super::frame::{self, hex};
use super::{Opcode, PacketSize, ProtocolError, Transport, REPLY_LEN};

/// Subcommand byte of UPLOAD requesting a packet by index
const UPLOAD_BY_INDEX: u8 = 0x01;

/// What to do when a packet cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketFailurePolicy {
    /// Log the packet as missing and continue with the next index
    #[default]
    Skip,
    /// Stop the transfer and return the error
    Abort,
}

/// Number of packets needed for `total_bytes` at `packet_size`
pub fn packet_count_for(total_bytes: u32, packet_size: u32) -> u32 {
    if packet_size == 0 {
        return 0;
    }
    total_bytes.div_ceil(packet_size)
}

/// Payload length of packet `index` (1-based).
///
/// Every packet is full except the last, which carries the remainder; an
/// exact multiple leaves a full last packet, never an empty one.
pub fn expected_packet_len(index: u16, packet_count: u16, total_bytes: u32, packet_size: u32) -> usize {
    if index < packet_count {
        return packet_size as usize;
    }
    match total_bytes % packet_size {
        0 => packet_size as usize,
        rem => rem as usize,
    }
}

/// UPLOAD parameters for one packet
pub fn upload_parameters(index: u16, packet_count: u16) -> [u8; 6] {
    let [index_hi, index_lo] = index.to_be_bytes();
    let [count_hi, count_lo] = packet_count.to_be_bytes();
    [UPLOAD_BY_INDEX, index_hi, index_lo, count_hi, count_lo, 0x00]
}

/// Image bytes assembled in packet order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuffer {
    data: Vec<u8>,
    expected_len: usize,
}

impl ImageBuffer {
    /// Create an empty buffer for an image of `expected_len` bytes
    pub fn with_expected_len(expected_len: usize) -> Self {
        Self {
            data: Vec::with_capacity(expected_len),
            expected_len,
        }
    }

    /// Wrap bytes read in one piece
    pub fn from_bytes(data: Vec<u8>, expected_len: usize) -> Self {
        Self { data, expected_len }
    }

    /// Append the next packet's payload
    pub fn extend(&mut self, payload: &[u8]) {
        self.data.extend_from_slice(payload);
    }

    /// Bytes received so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no bytes were received
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size the camera advertised
    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// Whether every advertised byte arrived
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.expected_len
    }

    /// Borrow the image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the image bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Warning raised when the assembled image is shorter than advertised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIncomplete {
    /// Bytes the camera advertised
    pub expected: usize,
    /// Bytes actually assembled
    pub received: usize,
    /// Packet indices that were skipped
    pub skipped: Vec<u16>,
}

impl fmt::Display for TransferIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transfer incomplete: {} of {} bytes, skipped packets {:?}",
            self.received, self.expected, self.skipped
        )
    }
}

/// Result of an image transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Assembled image
    pub buffer: ImageBuffer,
    /// Set when the buffer is shorter than advertised
    pub incomplete: Option<TransferIncomplete>,
}

impl TransferOutcome {
    /// Build an outcome, deriving the incomplete warning from the buffer
    pub fn new(buffer: ImageBuffer, skipped: Vec<u16>) -> Self {
        let incomplete = if buffer.is_complete() && skipped.is_empty() {
            None
        } else {
            Some(TransferIncomplete {
                expected: buffer.expected_len(),
                received: buffer.len(),
                skipped,
            })
        };
        Self { buffer, incomplete }
    }

    /// Whether every advertised byte arrived
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }
}

/// Drives the indexed packet upload over a borrowed transport
pub struct ChunkedTransfer<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    policy: PacketFailurePolicy,
    retries: u8,
    verify_checksum: bool,
}

impl<'a, T: Transport + ?Sized> ChunkedTransfer<'a, T> {
    /// Create a transfer with the skip policy, no retries, and checksum verification
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            policy: PacketFailurePolicy::Skip,
            retries: 0,
            verify_checksum: true,
        }
    }

    /// Set the per-packet failure policy
    pub fn policy(mut self, policy: PacketFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Re-request a timed-out packet up to `retries` times
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    /// Enable or disable checksum verification of packet replies
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Request one packet and return its payload
    fn fetch_packet(
        &mut self,
        index: u16,
        packet_count: u16,
        expected_len: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let request = frame::encode(Opcode::Upload.byte(), &upload_parameters(index, packet_count))?;
        debug!("packet {}/{}: request {}", index, packet_count, hex(&request));
        self.transport.write_frame(&request)?;

        let reply = self.transport.read_exact(REPLY_LEN + expected_len)?;
        let payload = frame::decode_packet_reply(&reply, expected_len, self.verify_checksum)?;
        Ok(payload.to_vec())
    }

    /// Fetch a packet, re-requesting it after timeouts while retries remain
    fn fetch_with_retries(
        &mut self,
        index: u16,
        packet_count: u16,
        expected_len: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut attempt = 0;
        loop {
            match self.fetch_packet(index, packet_count, expected_len) {
                Err(e) if e.is_timeout() && attempt < self.retries => {
                    attempt += 1;
                    warn!("packet {} timed out, retry {}/{}", index, attempt, self.retries);
                    self.transport.clear_input()?;
                }
                result => return result,
            }
        }
    }

    /// Upload the whole image, strictly in index order
    pub fn upload(
        &mut self,
        total_bytes: u32,
        packet_count: u16,
        packet_size: PacketSize,
    ) -> Result<TransferOutcome, ProtocolError> {
        let size = packet_size.bytes();
        let required = packet_count_for(total_bytes, size);
        if required != u32::from(packet_count) {
            warn!(
                "camera reported {} packets, {} bytes at {} per packet needs {}",
                packet_count, total_bytes, size, required
            );
        }

        info!(
            "uploading {} bytes in {} packets of {}",
            total_bytes, packet_count, size
        );

        let mut buffer = ImageBuffer::with_expected_len(total_bytes as usize);
        let mut skipped = Vec::new();

        for index in 1..=packet_count {
            let expected_len = expected_packet_len(index, packet_count, total_bytes, size);
            match self.fetch_with_retries(index, packet_count, expected_len) {
                Ok(payload) => buffer.extend(&payload),
                Err(e) => match self.policy {
                    PacketFailurePolicy::Abort => {
                        warn!("packet {}/{} failed, aborting: {}", index, packet_count, e);
                        return Err(e);
                    }
                    PacketFailurePolicy::Skip => {
                        warn!("packet {}/{} skipped: {}", index, packet_count, e);
                        skipped.push(index);
                        // Late bytes of the failed reply must not shift the next one
                        self.transport.clear_input()?;
                    }
                },
            }
        }

        let outcome = TransferOutcome::new(buffer, skipped);
        match &outcome.incomplete {
            Some(warning) => warn!("{}", warning),
            None => info!("upload complete: {} bytes", outcome.buffer.len()),
        }
        Ok(outcome)
    }
}
