// RAM module - block-granular memory device
//
// This module implements the plain memory device that backs the machine's
// address space. The program image is loaded into the first RAM device on the
// bus, and the stack lives at its top. RAM only speaks whole blocks; the
// block caches above the bus absorb all finer-grained traffic.

use crate::bus::{BusDevice, BusError, DeviceKind, BLOCK_SIZE};

/// Random-access memory device
///
/// Storage is a flat byte vector sized in whole blocks. The bus addresses the
/// device by block index, so every transfer is a straight copy of one
/// `BLOCK_SIZE`-byte slice.
///
/// # Examples
///
/// ```
/// use rm64::bus::{AddressBus, BLOCK_SIZE};
/// use rm64::ram::Ram;
///
/// let mut bus = AddressBus::new();
/// let base = bus.add_device(Box::new(Ram::new(1024 * 1024))).unwrap();
/// assert_eq!(base, 0);
/// ```
#[derive(Clone)]
pub struct Ram {
    memory: Vec<u8>,
}

impl Ram {
    /// Create a zero-filled RAM of at least `size` bytes.
    ///
    /// The size is rounded up to a whole number of blocks so the device
    /// always owns full blocks.
    pub fn new(size: usize) -> Self {
        let blocks = size.div_ceil(BLOCK_SIZE).max(1);
        Ram {
            memory: vec![0u8; blocks * BLOCK_SIZE],
        }
    }

    /// Size of the device in bytes (always a multiple of `BLOCK_SIZE`)
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    fn block_slice(&self, block: u64) -> Result<&[u8], BusError> {
        let offset = block as usize * BLOCK_SIZE;
        self.memory
            .get(offset..offset + BLOCK_SIZE)
            .ok_or(BusError::OutOfRange(offset as u64))
    }
}

impl BusDevice for Ram {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Memory
    }

    fn init(&mut self) -> Option<u64> {
        Some((self.memory.len() / BLOCK_SIZE) as u64)
    }

    fn read_block(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<(), BusError> {
        out.copy_from_slice(self.block_slice(block)?);
        Ok(())
    }

    fn write_block(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> Result<(), BusError> {
        let offset = block as usize * BLOCK_SIZE;
        let slice = self
            .memory
            .get_mut(offset..offset + BLOCK_SIZE)
            .ok_or(BusError::OutOfRange(offset as u64))?;
        slice.copy_from_slice(data);
        Ok(())
    }

    fn lock_block(&mut self, block: u64) -> Option<&mut [u8]> {
        let offset = block as usize * BLOCK_SIZE;
        self.memory.get_mut(offset..offset + BLOCK_SIZE)
    }
}
