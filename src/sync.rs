//! Bootloader synchronisation state machine.
//!
//! The host repeatedly sends [`SYNC_POLL`](crate::protocol::SYNC_POLL) and
//! collects the two byte reply, which may arrive split across poll cycles
//! while the device is still booting. Only [`SYNC_READY`] completes the sync.

use crate::protocol::SYNC_READY;

/// Outcome of a poll cycle
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Poll {
    /// Reply incomplete, keep polling
    Pending,
    /// Two or more bytes received without the ready pattern, last pair attached
    Rejected([u8; 2]),
    /// Device is ready
    Ready,
}

/// Accumulates sync replies across poll cycles
///
/// Replies are matched anywhere in the accumulated bytes, so a stray byte
/// ahead of the device's reply pairs cannot hold the poll out of step.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SyncPoll {
    buff: Vec<u8>,
    attempts: u32,
}

impl SyncPoll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of poll cycles started
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start a new poll cycle
    pub fn begin(&mut self) {
        self.attempts += 1;
    }

    /// Feed bytes received during the current cycle
    pub fn feed(&mut self, data: &[u8]) -> Poll {
        self.buff.extend_from_slice(data);

        if self.buff.windows(2).any(|w| w == &SYNC_READY[..]) {
            self.buff.clear();
            return Poll::Ready;
        }

        let n = self.buff.len();
        if n < 2 {
            return Poll::Pending;
        }

        let last = [self.buff[n - 2], self.buff[n - 1]];

        // A trailing 0x64 may be the first half of the next reply
        self.buff.clear();
        if last[1] == SYNC_READY[0] {
            self.buff.push(last[1]);
        }

        Poll::Rejected(last)
    }
}
