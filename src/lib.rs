//! SBL Serial Bootloader host driver.
//!
//! SBL is a minimal read / write / exec bootloader. Commands carry a 16-bit
//! offset into a 64KB window selected by a base address register, see
//! [`protocol`] for the wire format and [`memory`] for the addressed
//! operations built on top of [`Programmer::send`].

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod codec;
pub mod image;
pub mod memory;
pub mod protocol;
pub mod sync;

pub use codec::{format_hex, hexstr, FormatError, Value};
pub use image::{segment_len, Image, MemoryImage, Segment, StartAddress};
pub use protocol::{Access, AccessWidth, Frame, Precondition};

use protocol::{DEFAULT_LOOP_SIZE, STATUS_OK, SYNC_POLL};
use sync::{Poll, SyncPoll};

/// Serial port used to talk to the bootloader
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    /// Discard pending received bytes, returning the number dropped
    fn clear_input(&mut self) -> Result<usize, E> {
        let mut n = 0;
        loop {
            match <Self as Read<u8>>::read(self) {
                Ok(_) => n += 1,
                Err(nb::Error::WouldBlock) => return Ok(n),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Unsynced,
    Syncing,
    Ready,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: core::fmt::Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("invalid value: {0}")]
    Format(FormatError),

    #[error("{0}")]
    Precondition(Precondition),

    #[error("unexpected ack 0x{got:02x} (expected 0x{expected:02x}, trailing status {status:02x?})")]
    AckMismatch { got: u8, expected: u8, status: Option<[u8; 2]> },

    #[error("bad status {0:02x?}")]
    BadStatus([u8; 2]),

    #[error("no sync response after {0} attempts")]
    SyncTimeout(u32),

    #[error("verify failed at 0x{address:08x} (expected 0x{expected:02x}, read 0x{actual:02x})")]
    VerifyMismatch { address: u32, expected: u8, actual: u8 },
}

impl<SerialError: core::fmt::Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Window to wait for sync replies and diagnostic reads
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Maximum sync polls before giving up (polls forever if unset)
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub sync_attempts: Option<u32>,

    /// Bytes per read / write command
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "252"))]
    pub loop_size: usize,

    /// Log every byte sent and received
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 100,
            poll_delay_ms: 1,
            sync_attempts: None,
            loop_size: DEFAULT_LOOP_SIZE,
            verbose: false,
        }
    }
}

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    port: P,
    delay: D,
    base: Option<u32>,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            state: State::Unsynced,
            options,
            port,
            delay,
            base: None,
            _err: PhantomData,
        }
    }

    /// Create a programmer and sync with the bootloader
    pub fn connect(port: P, delay: D, options: Options) -> Result<Self, Error<E>> {
        let mut p = Self::new(port, delay, options);
        p.init()?;
        Ok(p)
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Base address last written to the device, if any
    pub fn base(&self) -> Option<u32> {
        self.base
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Release the underlying port
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Synchronise with the bootloader
    ///
    /// Polls until the device replies with the ready pattern, or until
    /// `sync_attempts` polls have been sent. The cached base address is
    /// cleared, so the next access always sets the base register.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.state = State::Unsynced;
        self.base = None;

        let n = self.port.clear_input()?;
        if n > 0 {
            debug!("Discarded {} pending bytes", n);
        }

        self.state = State::Syncing;
        debug!("Polling for bootloader");

        let mut poll = SyncPoll::new();

        loop {
            if let Some(max) = self.options.sync_attempts {
                if poll.attempts() >= max {
                    error!("No bootloader response after {} polls", max);
                    return Err(Error::SyncTimeout(max));
                }
            }

            poll.begin();
            self.write_bytes(&[SYNC_POLL])?;

            let mut buff = [0u8; 2];
            let n = self.read_timeout(&mut buff, self.options.response_timeout_ms)?;

            match poll.feed(&buff[..n]) {
                Poll::Ready => break,
                Poll::Rejected(r) => trace!("Sync reply: {}", hexstr(&r)),
                Poll::Pending => (),
            }
        }

        debug!("Bootloader ready after {} polls", poll.attempts());
        self.state = State::Ready;

        Ok(())
    }

    /// Send a command frame
    ///
    /// Writes the header, checks the ack, then either writes the payload or
    /// reads back the number of bytes in the header length field, and finally
    /// checks the status word. Returns any bytes read.
    pub fn send(&mut self, frame: &Frame, wait_ack: bool, wait_status: bool) -> Result<Vec<u8>, Error<E>> {
        self.write_bytes(&frame.header)?;

        if wait_ack {
            let mut ack = [0u8; 1];
            self.read_exact(&mut ack)?;

            if ack[0] != frame.opcode() {
                // Best effort, the device may or may not follow up with a status
                let mut buff = [0u8; 2];
                let status = match self.read_timeout(&mut buff, self.options.response_timeout_ms) {
                    Ok(2) => Some(buff),
                    _ => None,
                };

                error!("Unexpected ack 0x{:02x} for command 0x{:02x}", ack[0], frame.opcode());

                return Err(Error::AckMismatch {
                    got: ack[0],
                    expected: frame.opcode(),
                    status,
                });
            }
        }

        let mut data = vec![];
        if !frame.payload.is_empty() {
            self.write_bytes(&frame.payload)?;
        } else if frame.length() > 0 {
            data = vec![0u8; frame.length() as usize];
            self.read_exact(&mut data)?;
        }

        if wait_status {
            let mut status = [0u8; 2];
            self.read_exact(&mut status)?;

            if status != STATUS_OK {
                error!("Command 0x{:02x} failed with status {}", frame.opcode(), hexstr(&status));
                return Err(Error::BadStatus(status));
            }
        }

        Ok(data)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        if self.options.verbose {
            debug!("tx: {}", hexstr(data));
        }

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    /// Blocking read, waits indefinitely for each byte
    fn read_exact(&mut self, buff: &mut [u8]) -> Result<(), Error<E>> {
        for b in buff.iter_mut() {
            *b = block!(self.port.read())?;
        }

        if self.options.verbose {
            debug!("rx: {}", hexstr(buff));
        }

        Ok(())
    }

    /// Bounded read, returns the number of bytes received before the timeout
    fn read_timeout(&mut self, buff: &mut [u8], timeout_ms: u32) -> Result<usize, Error<E>> {
        let poll_delay = self.options.poll_delay_ms.max(1);
        let mut n = 0;
        let mut t = 0;

        while n < buff.len() {
            match self.port.read() {
                Ok(v) => {
                    buff[n] = v;
                    n += 1;
                }
                Err(nb::Error::WouldBlock) => {
                    if t >= timeout_ms {
                        break;
                    }
                    self.delay.delay_ms(poll_delay);
                    t += poll_delay;
                }
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }
        }

        if self.options.verbose && n > 0 {
            debug!("rx: {}", hexstr(&buff[..n]));
        }

        Ok(n)
    }
}
