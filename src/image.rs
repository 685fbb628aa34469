//! Firmware memory images.
//!
//! Loading and verification only need the address ranges covered by an image
//! and the byte at each address, so file formats stay outside this crate:
//! anything implementing [`MemoryImage`] can be loaded.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::protocol::Precondition;

/// Address range covered by an image, end inclusive so the last byte of the
/// address space can be described
pub type Segment = RangeInclusive<u32>;

/// Number of bytes in a segment
pub fn segment_len(segment: &Segment) -> usize {
    if segment.is_empty() {
        return 0;
    }
    (*segment.end() as u64 - *segment.start() as u64 + 1) as usize
}

/// Entry point recorded in an image
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum StartAddress {
    /// 32-bit linear entry point (EIP)
    Linear(u32),
    /// 8086 style segmented entry point
    Segmented { cs: u16, ip: u16 },
}

impl StartAddress {
    /// Linear entry address
    pub fn entry(&self) -> u32 {
        match self {
            StartAddress::Linear(eip) => *eip,
            StartAddress::Segmented { cs, ip } => ((*cs as u32) << 4) + *ip as u32,
        }
    }
}

pub trait MemoryImage {
    /// Covered address ranges in ascending order
    fn segments(&self) -> Vec<Segment>;

    /// Byte at an address within one of the segments
    fn byte_at(&self, address: u32) -> u8;

    fn start_address(&self) -> Option<StartAddress> {
        None
    }

    /// Collect the bytes of a segment
    fn segment_data(&self, segment: &Segment) -> Vec<u8> {
        segment.clone().map(|a| self.byte_at(a)).collect()
    }
}

/// Sparse in-memory image
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Image {
    data: BTreeMap<u32, u8>,
    start: Option<StartAddress>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image of a raw binary placed at `address`, entered at its first byte
    pub fn from_binary(address: u32, data: &[u8]) -> Result<Self, Precondition> {
        let mut i = Self::new();
        i.insert(address, data)?;
        i.set_start_address(StartAddress::Linear(address));
        Ok(i)
    }

    /// Place bytes at an address, replacing any existing content
    pub fn insert(&mut self, address: u32, data: &[u8]) -> Result<(), Precondition> {
        if address as u64 + data.len() as u64 > 1 << 32 {
            return Err(Precondition::OutOfRange { address, size: data.len() });
        }

        for (i, b) in data.iter().enumerate() {
            self.data.insert(address + i as u32, *b);
        }

        Ok(())
    }

    pub fn set_start_address(&mut self, start: StartAddress) {
        self.start = Some(start);
    }

    /// Total bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl MemoryImage for Image {
    fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = vec![];

        for a in self.data.keys() {
            match segments.last_mut() {
                Some(s) if s.end().checked_add(1) == Some(*a) => *s = *s.start()..=*a,
                _ => segments.push(*a..=*a),
            }
        }

        segments
    }

    fn byte_at(&self, address: u32) -> u8 {
        self.data.get(&address).copied().unwrap_or(0xff)
    }

    fn start_address(&self) -> Option<StartAddress> {
        self.start
    }
}
