// Cache module - direct-mapped write-back block cache
//
// This module implements the block cache that sits between the CPU core and
// the address bus. The bus only moves whole blocks; the cache absorbs the
// unaligned, sub-block, and multi-block accesses the instruction stream and
// the data path actually produce.
//
// The core keeps two independent instances: one for instruction fetch and one
// for data, so a burst of decoding never evicts hot data lines (and vice
// versa).
//
// # Policy
//
// - Direct-mapped: `line = (aligned_address / BLOCK_SIZE) % CACHE_LINES`
// - Write-back: stores only touch the line; the bus sees the bytes when the
//   line is evicted (or on an explicit `flush`)
// - A line is either unoccupied or mirrors exactly one aligned block

use crate::bus::{AddressBus, BusError, BLOCK_SIZE};

/// Number of lines per cache. Must be a power of two; 1 is valid (every miss
/// then evicts the sole line).
pub const CACHE_LINES: usize = 8;

/// Direct-mapped write-back cache of block-sized lines
pub struct BlockCache {
    lines: [[u8; BLOCK_SIZE]; CACHE_LINES],
    /// Tag of the aligned address each line mirrors; `None` = unoccupied
    tags: [Option<u64>; CACHE_LINES],
    dirty: [bool; CACHE_LINES],
}

impl BlockCache {
    /// Create a cache with every line unoccupied
    pub fn new() -> Self {
        BlockCache {
            lines: [[0u8; BLOCK_SIZE]; CACHE_LINES],
            tags: [None; CACHE_LINES],
            dirty: [false; CACHE_LINES],
        }
    }

    /// Align a byte address down to its block boundary
    #[inline]
    fn align(addr: u64) -> u64 {
        addr - addr % BLOCK_SIZE as u64
    }

    /// Line index for an aligned address
    #[inline]
    fn line_index(aligned: u64) -> usize {
        ((aligned / BLOCK_SIZE as u64) % CACHE_LINES as u64) as usize
    }

    /// Make the line for `aligned` mirror that block, evicting whatever the
    /// line held before.
    ///
    /// A dirty line is written back to the bus at its *old* tag first; if the
    /// write-back or the subsequent fill fails, the line is left unoccupied
    /// and the error propagates.
    fn validate_line(&mut self, bus: &mut AddressBus, aligned: u64) -> Result<usize, BusError> {
        let line = Self::line_index(aligned);

        if self.tags[line] == Some(aligned) {
            return Ok(line);
        }

        if let Some(old_tag) = self.tags[line] {
            if self.dirty[line] {
                if let Err(e) = bus.write_block(old_tag, &self.lines[line]) {
                    self.tags[line] = None;
                    self.dirty[line] = false;
                    return Err(e);
                }
            }
        }
        self.dirty[line] = false;

        if let Err(e) = bus.read_block(aligned, &mut self.lines[line]) {
            self.tags[line] = None;
            return Err(e);
        }

        self.tags[line] = Some(aligned);
        Ok(line)
    }

    /// Read `out.len()` bytes starting at byte address `addr`.
    ///
    /// Accesses that cross block boundaries are split across as many lines as
    /// they touch.
    pub fn read(&mut self, bus: &mut AddressBus, addr: u64, out: &mut [u8]) -> Result<(), BusError> {
        let mut addr = addr;
        let mut done = 0;

        while done < out.len() {
            let aligned = Self::align(addr);
            let line = self.validate_line(bus, aligned)?;

            let offset = (addr - aligned) as usize;
            let chunk = (BLOCK_SIZE - offset).min(out.len() - done);
            out[done..done + chunk].copy_from_slice(&self.lines[line][offset..offset + chunk]);

            done += chunk;
            addr = addr.wrapping_add(chunk as u64);
        }

        Ok(())
    }

    /// Write `data` starting at byte address `addr`.
    ///
    /// Every line touched gets its dirty bit set; nothing reaches the bus
    /// until eviction or `flush`.
    pub fn write(&mut self, bus: &mut AddressBus, addr: u64, data: &[u8]) -> Result<(), BusError> {
        let mut addr = addr;
        let mut done = 0;

        while done < data.len() {
            let aligned = Self::align(addr);
            let line = self.validate_line(bus, aligned)?;

            let offset = (addr - aligned) as usize;
            let chunk = (BLOCK_SIZE - offset).min(data.len() - done);
            self.lines[line][offset..offset + chunk].copy_from_slice(&data[done..done + chunk]);
            self.dirty[line] = true;

            done += chunk;
            addr = addr.wrapping_add(chunk as u64);
        }

        Ok(())
    }

    /// Read one byte
    pub fn read_u8(&mut self, bus: &mut AddressBus, addr: u64) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read(bus, addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian 16-bit value
    pub fn read_u16(&mut self, bus: &mut AddressBus, addr: u64) -> Result<u16, BusError> {
        let mut buf = [0u8; 2];
        self.read(bus, addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian 32-bit value
    pub fn read_u32(&mut self, bus: &mut AddressBus, addr: u64) -> Result<u32, BusError> {
        let mut buf = [0u8; 4];
        self.read(bus, addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian 64-bit value
    pub fn read_u64(&mut self, bus: &mut AddressBus, addr: u64) -> Result<u64, BusError> {
        let mut buf = [0u8; 8];
        self.read(bus, addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write one byte
    pub fn write_u8(&mut self, bus: &mut AddressBus, addr: u64, value: u8) -> Result<(), BusError> {
        self.write(bus, addr, &[value])
    }

    /// Write a little-endian 16-bit value
    pub fn write_u16(
        &mut self,
        bus: &mut AddressBus,
        addr: u64,
        value: u16,
    ) -> Result<(), BusError> {
        self.write(bus, addr, &value.to_le_bytes())
    }

    /// Write a little-endian 32-bit value
    pub fn write_u32(
        &mut self,
        bus: &mut AddressBus,
        addr: u64,
        value: u32,
    ) -> Result<(), BusError> {
        self.write(bus, addr, &value.to_le_bytes())
    }

    /// Write a little-endian 64-bit value
    pub fn write_u64(
        &mut self,
        bus: &mut AddressBus,
        addr: u64,
        value: u64,
    ) -> Result<(), BusError> {
        self.write(bus, addr, &value.to_le_bytes())
    }

    /// Write every dirty line back to the bus.
    ///
    /// Lines stay occupied and become clean. A line whose write-back fails is
    /// marked unoccupied before the error propagates.
    pub fn flush(&mut self, bus: &mut AddressBus) -> Result<(), BusError> {
        for line in 0..CACHE_LINES {
            if let Some(tag) = self.tags[line] {
                if self.dirty[line] {
                    if let Err(e) = bus.write_block(tag, &self.lines[line]) {
                        self.tags[line] = None;
                        self.dirty[line] = false;
                        return Err(e);
                    }
                    self.dirty[line] = false;
                }
            }
        }
        Ok(())
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}
