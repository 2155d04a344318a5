//! Byte transport abstraction
//!
//! Sessions talk to the camera through [`Transport`], a strictly half-duplex
//! request/reply channel. [`SerialTransport`] drives a real serial port; the
//! demo module provides an in-memory camera behind the same trait.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::frame::hex;
use super::serial::{clear_buffers, configure_port, open_port};
use super::{BaudRate, ProtocolError};

/// Blocking byte channel to a camera
pub trait Transport {
    /// Write a complete frame. Partial writes are never left behind.
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Read exactly `n` bytes, failing with `Timeout` when the deadline passes
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError>;

    /// Switch the link speed without closing the connection.
    ///
    /// Callers must have drained every reply sent at the old rate.
    fn set_baud(&mut self, baud: BaudRate) -> Result<(), ProtocolError>;

    /// Current link speed
    fn baud(&self) -> BaudRate;

    /// Change the per-read deadline
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError>;

    /// Discard any unread input
    fn clear_input(&mut self) -> Result<(), ProtocolError>;

    /// Number of received bytes not yet read
    fn bytes_pending(&mut self) -> Result<usize, ProtocolError>;

    /// Release the underlying connection. Further I/O fails with `NotConnected`.
    fn close(&mut self);

    /// Whether the connection is still held
    fn is_open(&self) -> bool;

    /// Wait for the device to settle between protocol phases
    fn settle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Poll interval while waiting for reply bytes
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Serial port transport
pub struct SerialTransport {
    /// Port handle, `None` once closed
    port: Option<Box<dyn SerialPort>>,
    /// Port name, kept for log context
    name: String,
    /// Current link speed
    baud: BaudRate,
    /// Deadline for a single `read_exact`
    timeout: Duration,
    /// Metrics: cumulative bytes sent & received
    tx_bytes: u64,
    rx_bytes: u64,
}

impl SerialTransport {
    /// Open and configure a serial port.
    ///
    /// The port is dropped (and closed) if configuration fails.
    pub fn open(name: &str, baud: BaudRate, timeout: Duration) -> Result<Self, ProtocolError> {
        let mut port = open_port(name, baud, timeout)?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;

        debug!(port = name, baud = baud.as_u32(), "serial transport open");
        Ok(Self {
            port: Some(port),
            name: name.to_string(),
            baud,
            timeout,
            tx_bytes: 0,
            rx_bytes: 0,
        })
    }

    /// Port name this transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port()?;
        trace!("tx {} bytes: {}", bytes.len(), hex(bytes));
        port.write_all(bytes)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        port.flush()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        Ok(())
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let timeout = self.timeout;
        let port = self.port()?;
        let mut buf = vec![0u8; n];
        let start = Instant::now();
        let mut offset = 0;

        // Poll bytes_to_read() so a slow device never blocks past the deadline
        while offset < n {
            if start.elapsed() > timeout {
                debug!("read timed out after {} of {} bytes", offset, n);
                return Err(ProtocolError::Timeout {
                    expected: n,
                    received: offset,
                });
            }

            let available = port
                .bytes_to_read()
                .map_err(|e| ProtocolError::SerialError(e.to_string()))?
                as usize;
            if available == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let to_read = available.min(n - offset);
            match port.read(&mut buf[offset..offset + to_read]) {
                Ok(0) => {
                    return Err(ProtocolError::Timeout {
                        expected: n,
                        received: offset,
                    })
                }
                Ok(read) => offset += read,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }

        trace!("rx {} bytes: {}", n, hex(&buf));
        self.rx_bytes = self.rx_bytes.saturating_add(n as u64);
        Ok(buf)
    }

    fn set_baud(&mut self, baud: BaudRate) -> Result<(), ProtocolError> {
        let pending = self.bytes_pending()?;
        if pending > 0 {
            return Err(ProtocolError::UnreadDataOnBaudSwitch { pending });
        }
        self.port()?
            .set_baud_rate(baud.as_u32())
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        debug!(port = %self.name, from = self.baud.as_u32(), to = baud.as_u32(), "baud switched");
        self.baud = baud;
        Ok(())
    }

    fn baud(&self) -> BaudRate {
        self.baud
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.port()?
            .set_timeout(timeout)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn bytes_pending(&mut self) -> Result<usize, ProtocolError> {
        let pending = self
            .port()?
            .bytes_to_read()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(pending as usize)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(
                port = %self.name,
                tx = self.tx_bytes,
                rx = self.rx_bytes,
                "serial transport closed"
            );
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
