//! Scripted transport shared by the integration tests
#![allow(dead_code)]

use camlink_core::protocol::frame;
use camlink_core::protocol::{BaudRate, ProtocolError, Transport};
use std::collections::VecDeque;
use std::time::Duration;

/// What the fake device does in answer to the next written frame
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Queue these bytes for reading
    Reply(Vec<u8>),
    /// Say nothing, so the next read times out
    Silence,
}

/// Everything the code under test did to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Read(usize),
    SetBaud(u32),
    ClearInput,
    Close,
}

/// Transport answering writes from a script and recording every call
pub struct MockTransport {
    script: VecDeque<Scripted>,
    pending: VecDeque<u8>,
    baud: BaudRate,
    open: bool,
    pub events: Vec<Event>,
}

impl MockTransport {
    pub fn new(baud: BaudRate) -> Self {
        Self {
            script: VecDeque::new(),
            pending: VecDeque::new(),
            baud,
            open: true,
            events: Vec::new(),
        }
    }

    pub fn with_script(baud: BaudRate, script: impl IntoIterator<Item = Scripted>) -> Self {
        let mut transport = Self::new(baud);
        transport.script.extend(script);
        transport
    }

    /// Frames written so far
    pub fn writes(&self) -> Vec<&[u8]> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.events.push(Event::Write(bytes.to_vec()));
        if let Some(Scripted::Reply(reply)) = self.script.pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.events.push(Event::Read(n));
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
        self.events.push(Event::SetBaud(baud.as_u32()));
        self.baud = baud;
        Ok(())
    }

    fn baud(&self) -> BaudRate {
        self.baud
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.events.push(Event::ClearInput);
        self.pending.clear();
        Ok(())
    }

    fn bytes_pending(&mut self) -> Result<usize, ProtocolError> {
        Ok(self.pending.len())
    }

    fn close(&mut self) {
        if self.open {
            self.events.push(Event::Close);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn settle(&mut self, _delay: Duration) {}
}

/// Successful 13-byte reply to `opcode` with five payload bytes
pub fn ok_reply(opcode: u8, payload: [u8; 5]) -> Scripted {
    let mut params = [0u8; 6];
    params[1..].copy_from_slice(&payload);
    Scripted::Reply(frame::encode(opcode, &params).expect("six parameters"))
}

/// 13-byte reply to `opcode` carrying a nonzero status
pub fn status_reply(opcode: u8, status: u8) -> Scripted {
    Scripted::Reply(frame::encode(opcode, &[status, 0, 0, 0, 0, 0]).expect("six parameters"))
}

/// TAKEPIC reply announcing `total` bytes in `packets` packets
pub fn capture_reply(total: u32, packets: u16) -> Scripted {
    let len = total.to_be_bytes();
    let count = packets.to_be_bytes();
    ok_reply(0x05, [len[1], len[2], len[3], count[0], count[1]])
}

/// Upload reply for packet `index` of `count` carrying `payload`
pub fn packet_reply(index: u16, count: u16, payload: &[u8]) -> Scripted {
    let [ih, il] = index.to_be_bytes();
    let [ch, cl] = count.to_be_bytes();
    Scripted::Reply(frame::encode_packet_reply(&[0x00, ih, il, ch, cl, 0x00], payload))
}

/// Payload filled with `byte`
pub fn filled(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}
