#![allow(dead_code)]

use std::collections::VecDeque;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use sbl_loader::{Options, Programmer, SerialPort};

/// Consecutive empty reads before the mock reports the script exhausted
const IDLE_LIMIT: u32 = 100_000;

#[derive(Clone, PartialEq, Debug)]
pub enum MockError {
    Exhausted,
}

/// Scripted serial port
///
/// Replies are queued up front. A `None` entry is a silent gap: reads see
/// `WouldBlock` until the host writes again.
#[derive(Default, Debug)]
pub struct MockPort {
    pub stale: Vec<u8>,
    pub rx: VecDeque<Option<u8>>,
    pub tx: Vec<u8>,
    pub cleared: bool,
    idle: u32,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue reply bytes
    pub fn reply(&mut self, data: &[u8]) -> &mut Self {
        self.rx.extend(data.iter().map(|b| Some(*b)));
        self
    }

    /// Queue a silent gap
    pub fn gap(&mut self) -> &mut Self {
        self.rx.push_back(None);
        self
    }

    /// Queue the reply to a successful command
    pub fn ok(&mut self, opcode: u8, data: &[u8]) -> &mut Self {
        self.reply(&[opcode]).reply(data).reply(&[0x90, 0x00])
    }

    pub fn remaining(&self) -> usize {
        self.rx.len()
    }
}

impl Read<u8> for MockPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if !self.stale.is_empty() {
            return Ok(self.stale.remove(0));
        }

        match self.rx.front() {
            Some(Some(b)) => {
                let b = *b;
                self.rx.pop_front();
                self.idle = 0;
                Ok(b)
            }
            _ => {
                self.idle += 1;
                if self.idle > IDLE_LIMIT {
                    Err(nb::Error::Other(MockError::Exhausted))
                } else {
                    Err(nb::Error::WouldBlock)
                }
            }
        }
    }
}

impl Write<u8> for MockPort {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        if let Some(None) = self.rx.front() {
            self.rx.pop_front();
        }
        self.tx.push(word);
        self.idle = 0;
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

impl SerialPort<MockError> for MockPort {
    fn clear_input(&mut self) -> Result<usize, MockError> {
        let n = self.stale.len();
        self.stale.clear();
        self.cleared = true;
        Ok(n)
    }
}

/// Delay that returns immediately
pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

pub type MockProgrammer = Programmer<MockPort, NoDelay, MockError>;

/// Programmer synced on the first poll, with `script` queued for the following commands
pub fn ready<F: FnOnce(&mut MockPort)>(script: F) -> MockProgrammer {
    let mut port = MockPort::new();
    port.reply(&[0x64, 0x00]);
    script(&mut port);

    let mut p = Programmer::connect(port, NoDelay, Options::default()).unwrap();
    p.port_mut().tx.clear();
    p
}

/// Split host output into command headers, given the payload length sent after each
pub fn headers(tx: &[u8], payloads: &[usize]) -> Vec<Vec<u8>> {
    let mut out = vec![];
    let mut i = 0;

    for p in payloads {
        out.push(tx[i..i + 5].to_vec());
        i += 5 + p;
    }

    assert_eq!(i, tx.len(), "unexpected trailing bytes");
    out
}
