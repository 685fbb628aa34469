//! SBL wire protocol constants and frame builders.
//!
//! Every command starts with a five byte header `[class, ins, p1, p2, len]`
//! (ISO7816 T=0 TPDU style). The device echoes `ins` as an ack, the payload
//! is transferred, then a two byte status word closes the exchange.

use core::convert::TryFrom;
use core::str::FromStr;

/// Single byte sent to poll the bootloader during sync
pub const SYNC_POLL: u8 = 0x00;

/// Response to a sync poll once the bootloader is ready
pub const SYNC_READY: [u8; 2] = [0x64, 0x00];

/// Status word reported on success
pub const STATUS_OK: [u8; 2] = [0x90, 0x00];

/// Header length for all commands
pub const HEADER_LEN: usize = 5;

/// Largest payload a single command can carry
pub const MAX_CHUNK: usize = 255;

/// Default bytes per access command, a multiple of every access width
pub const DEFAULT_LOOP_SIZE: usize = 252;

/// Default bootloader baud rate
pub const DEFAULT_BAUD: usize = 115200;

/// Size of the window addressed by the 16-bit header offset
pub const WINDOW_SIZE: u32 = 0x1_0000;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Reads up to 255 bytes from base + offset
    Read = 0x0A,

    /// Sets the base address register used by all other commands
    SetBase = 0x0B,

    /// Writes up to 255 bytes to base + offset
    Write = 0x0C,

    /// Calls the code at base + offset
    Exec = 0x0E,
}

/// Caller violated an operation's preconditions
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum Precondition {
    #[error("invalid access width {0} (expected 8, 16 or 32)")]
    InvalidAccessWidth(u32),

    #[error("invalid access width '{0}' (expected 8, 16 or 32)")]
    UnknownAccessWidth(String),

    #[error("invalid command length {0} (expected 1..=255)")]
    InvalidLength(usize),

    #[error("invalid loop size {0} (expected 1..=255)")]
    InvalidLoopSize(usize),

    #[error("loop size {loop_size} is not a multiple of the {unit} byte access unit")]
    LoopSizeUnaligned { loop_size: usize, unit: usize },

    #[error("transfer size {size} is not a multiple of the {unit} byte access unit")]
    SizeUnaligned { size: usize, unit: usize },

    #[error("address 0x{address:08x} is not aligned to the {unit} byte access unit")]
    AddressUnaligned { address: u32, unit: usize },

    #[error("{size} bytes at 0x{address:08x} runs past the end of the address space")]
    OutOfRange { address: u32, size: usize },

    #[error("segment at 0x{start:08x} shifted by 0x{offset:08x} runs past the end of the address space")]
    SegmentOutOfRange { start: u32, offset: u32 },

    #[error("payload of {0} bytes exceeds the 255 byte limit")]
    PayloadTooLarge(usize),

    #[error("exec cannot send data and request a response size")]
    ExecDataWithRxSize,

    #[error("fill pattern is empty")]
    EmptyPattern,
}

/// Memory access width
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AccessWidth {
    Bits8 = 8,
    Bits16 = 16,
    Bits32 = 32,
}

impl AccessWidth {
    /// Access unit size in bytes
    pub fn unit(&self) -> usize {
        *self as usize / 8
    }

    /// Class byte used in access command headers
    pub fn class(&self) -> u8 {
        *self as u8
    }
}

impl Default for AccessWidth {
    fn default() -> Self {
        AccessWidth::Bits8
    }
}

impl TryFrom<u32> for AccessWidth {
    type Error = Precondition;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            8 => Ok(AccessWidth::Bits8),
            16 => Ok(AccessWidth::Bits16),
            32 => Ok(AccessWidth::Bits32),
            _ => Err(Precondition::InvalidAccessWidth(v)),
        }
    }
}

impl FromStr for AccessWidth {
    type Err = Precondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(v) => AccessWidth::try_from(v),
            Err(_) => Err(Precondition::UnknownAccessWidth(s.to_string())),
        }
    }
}

/// Direction and size of a memory access
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Access<'a> {
    /// Read the given number of bytes
    Read(usize),
    /// Write the given bytes
    Write(&'a [u8]),
}

/// A command header with optional outbound payload
#[derive(Debug, PartialEq, Clone)]
pub struct Frame {
    pub header: [u8; HEADER_LEN],
    pub payload: Vec<u8>,
}

impl Frame {
    /// Instruction byte, echoed back by the device as the ack
    pub fn opcode(&self) -> u8 {
        self.header[1]
    }

    /// Final header byte, the transfer length for most commands
    pub fn length(&self) -> u8 {
        self.header[4]
    }

    /// Full frame as sent on the wire
    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = self.header.to_vec();
        v.extend_from_slice(&self.payload);
        v
    }
}

/// Build a set base command
pub fn build_set_base(base: u32) -> Frame {
    Frame {
        header: [0x00, Command::SetBase as u8, 0x00, 0x00, 0x04],
        payload: base.to_le_bytes().to_vec(),
    }
}

/// Build a read or write access command at an offset in the current window
pub fn build_access(width: AccessWidth, access: Access, offset: u16) -> Result<Frame, Precondition> {
    let (command, len, payload) = match access {
        Access::Read(len) => (Command::Read, len, vec![]),
        Access::Write(data) => (Command::Write, data.len(), data.to_vec()),
    };

    // A zero length would be read by the device as 256
    if len == 0 || len > MAX_CHUNK {
        return Err(Precondition::InvalidLength(len));
    }

    let o = offset.to_le_bytes();

    Ok(Frame {
        header: [width.class(), command as u8, o[0], o[1], len as u8],
        payload,
    })
}

/// Build an exec command, either sending `data` or requesting `rxsize` bytes back
pub fn build_exec(offset: u16, data: Option<&[u8]>, rxsize: u8) -> Result<Frame, Precondition> {
    let (len, payload) = match data {
        Some(_) if rxsize != 0 => return Err(Precondition::ExecDataWithRxSize),
        Some(d) if d.len() > MAX_CHUNK => return Err(Precondition::PayloadTooLarge(d.len())),
        Some(d) => (d.len() as u8, d.to_vec()),
        None => (rxsize, vec![]),
    };

    let o = offset.to_le_bytes();

    Ok(Frame {
        header: [0x00, Command::Exec as u8, o[0], o[1], len],
        payload,
    })
}
