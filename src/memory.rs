//! Addressed memory operations.
//!
//! Commands only carry a 16-bit offset, so each access first makes sure the
//! device base register points at the 64KB window containing the target
//! address. Transfers are then split into commands of at most `loop_size`
//! bytes, and at window boundaries.

use embedded_hal::blocking::delay::DelayMs;

use crate::codec::Value;
use crate::image::{MemoryImage, Segment};
use crate::protocol::{build_access, build_exec, build_set_base, Access, AccessWidth, Precondition, MAX_CHUNK, WINDOW_SIZE};
use crate::{Error, Programmer, SerialPort};

/// Split an address range at window boundaries
fn windows(address: u32, size: usize) -> Vec<(u32, usize)> {
    let mut parts = vec![];
    let mut address = address as u64;
    let mut remaining = size as u64;

    while remaining > 0 {
        let window_end = (address & !(WINDOW_SIZE as u64 - 1)) + WINDOW_SIZE as u64;
        let n = remaining.min(window_end - address);

        parts.push((address as u32, n as usize));

        address += n;
        remaining -= n;
    }

    parts
}

fn check_transfer(address: u32, size: usize, width: AccessWidth, loop_size: usize) -> Result<(), Precondition> {
    let unit = width.unit();

    if loop_size == 0 || loop_size > MAX_CHUNK {
        return Err(Precondition::InvalidLoopSize(loop_size));
    }
    if loop_size % unit != 0 {
        return Err(Precondition::LoopSizeUnaligned { loop_size, unit });
    }
    if size % unit != 0 {
        return Err(Precondition::SizeUnaligned { size, unit });
    }
    if address as usize % unit != 0 {
        return Err(Precondition::AddressUnaligned { address, unit });
    }
    if address as u64 + size as u64 > 1 << 32 {
        return Err(Precondition::OutOfRange { address, size });
    }

    Ok(())
}

/// Load address of a segment moved by `offset`, the whole segment must stay
/// inside the address space
fn shift_segment(segment: &Segment, offset: u32) -> Result<u32, Precondition> {
    let start = *segment.start();

    match segment.end().checked_add(offset) {
        Some(_) => Ok(start + offset),
        None => Err(Precondition::SegmentOutOfRange { start, offset }),
    }
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Point the base register at the window containing `address`,
    /// returning the offset of `address` within it
    pub fn resolve(&mut self, address: u32) -> Result<u16, Error<E>> {
        let offset = (address & 0xFFFF) as u16;
        let base = address - offset as u32;

        if self.base != Some(base) {
            debug!("Setting base 0x{:08x}", base);
            self.send(&build_set_base(base), true, true)?;
            self.base = Some(base);
        }

        Ok(offset)
    }

    /// Read `size` bytes from `address`
    pub fn read(&mut self, address: u32, size: usize, width: AccessWidth, loop_size: usize) -> Result<Vec<u8>, Error<E>> {
        check_transfer(address, size, width, loop_size).map_err(Error::Precondition)?;

        let mut data = Vec::with_capacity(size);

        for (addr, len) in windows(address, size) {
            let mut offset = self.resolve(addr)?;
            let mut remaining = len;

            while remaining > 0 {
                let n = remaining.min(loop_size);
                let frame = build_access(width, Access::Read(n), offset).map_err(Error::Precondition)?;

                data.extend(self.send(&frame, true, true)?);

                offset = offset.wrapping_add(n as u16);
                remaining -= n;
            }
        }

        Ok(data)
    }

    /// Write `data` to `address`
    pub fn write(&mut self, address: u32, data: &[u8], width: AccessWidth, loop_size: usize) -> Result<(), Error<E>> {
        check_transfer(address, data.len(), width, loop_size).map_err(Error::Precondition)?;

        let mut index = 0;

        for (addr, len) in windows(address, data.len()) {
            let mut offset = self.resolve(addr)?;

            for chunk in data[index..index + len].chunks(loop_size) {
                let frame = build_access(width, Access::Write(chunk), offset).map_err(Error::Precondition)?;

                self.send(&frame, true, true)?;

                offset = offset.wrapping_add(chunk.len() as u16);
            }

            index += len;
        }

        Ok(())
    }

    /// Fill `size` bytes at `address` by repeating a pattern
    ///
    /// The final repetition is truncated when `size` is not a multiple of
    /// the pattern length.
    pub fn fill(&mut self, address: u32, value: &Value, size: usize, width: AccessWidth, loop_size: usize) -> Result<(), Error<E>> {
        let pattern = value.to_bytes().map_err(Error::Format)?;
        if pattern.is_empty() {
            return Err(Error::Precondition(Precondition::EmptyPattern));
        }

        let data: Vec<u8> = pattern.iter().cycle().take(size).copied().collect();

        self.write(address, &data, width, loop_size)
    }

    /// Execute code at `address`
    ///
    /// Either sends `data` to the called code or reads `rxsize` bytes back
    /// from it. The ack and status are skipped when the called code does
    /// not return to the bootloader.
    pub fn exec(
        &mut self,
        address: u32,
        data: Option<&[u8]>,
        rxsize: u8,
        wait_ack: bool,
        wait_status: bool,
    ) -> Result<Vec<u8>, Error<E>> {
        let frame = build_exec((address & 0xFFFF) as u16, data, rxsize).map_err(Error::Precondition)?;

        self.resolve(address)?;

        debug!("Executing at 0x{:08x}", address);

        self.send(&frame, wait_ack, wait_status)
    }

    /// Write a single image segment, shifted by `offset`
    pub fn load_segment<I: MemoryImage + ?Sized>(
        &mut self,
        image: &I,
        segment: &Segment,
        offset: u32,
        width: AccessWidth,
        loop_size: usize,
    ) -> Result<(), Error<E>> {
        let address = shift_segment(segment, offset).map_err(Error::Precondition)?;
        let data = image.segment_data(segment);

        debug!("Writing {} bytes at 0x{:08x}", data.len(), address);

        self.write(address, &data, width, loop_size)
    }

    /// Read back a single image segment and compare it
    pub fn verify_segment<I: MemoryImage + ?Sized>(
        &mut self,
        image: &I,
        segment: &Segment,
        offset: u32,
        width: AccessWidth,
        loop_size: usize,
    ) -> Result<(), Error<E>> {
        let address = shift_segment(segment, offset).map_err(Error::Precondition)?;
        let expected = image.segment_data(segment);

        debug!("Verifying {} bytes at 0x{:08x}", expected.len(), address);

        let actual = self.read(address, expected.len(), width, loop_size)?;

        let mismatch = expected.iter().zip(actual.iter()).enumerate().find(|(_, (e, a))| e != a);

        if let Some((i, (e, a))) = mismatch {
            let address = address + i as u32;
            error!("Verify failed at 0x{:08x}", address);

            return Err(Error::VerifyMismatch {
                address,
                expected: *e,
                actual: *a,
            });
        }

        Ok(())
    }

    /// Write every segment of an image
    pub fn load_image<I: MemoryImage + ?Sized>(
        &mut self,
        image: &I,
        offset: u32,
        width: AccessWidth,
        loop_size: usize,
    ) -> Result<(), Error<E>> {
        let segments = image.segments();

        for s in &segments {
            debug!("Image segment 0x{:08x} 0x{:08x}", s.start(), s.end());
        }

        for s in &segments {
            self.load_segment(image, s, offset, width, loop_size)?;
        }

        Ok(())
    }

    /// Read back and compare every segment of an image
    pub fn verify_image<I: MemoryImage + ?Sized>(
        &mut self,
        image: &I,
        offset: u32,
        width: AccessWidth,
        loop_size: usize,
    ) -> Result<(), Error<E>> {
        for s in &image.segments() {
            self.verify_segment(image, s, offset, width, loop_size)?;
        }

        Ok(())
    }
}
