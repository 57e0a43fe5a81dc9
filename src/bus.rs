// Bus module - device bus implementation
//
// This module implements the address bus that connects the CPU core to every
// memory-mapped device in the machine. The bus owns a sorted, non-overlapping
// set of devices over a flat 64-bit address space and routes block-granular
// reads, writes, and block locks to the device whose range contains the
// address.
//
// Addresses are byte addresses at the public interface. Internally every
// device range is expressed in whole blocks, so each transfer at the
// bus/device boundary is exactly one `BLOCK_SIZE`-byte block.

use std::fmt;

/// Size of one bus transfer block in bytes.
///
/// Must be at least 64 and a multiple of 64. Every transfer between the block
/// caches and a device moves exactly this many bytes.
pub const BLOCK_SIZE: usize = 64;

/// Maximum number of devices that can be attached to the bus
pub const MAX_DEVICES: usize = 30;

/// Errors produced by the bus and by devices behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// No device maps the address, or the block span crosses the owning
    /// device's upper bound
    OutOfRange(u64),

    /// The bus already holds `MAX_DEVICES` devices
    Full,

    /// The device's `init` hook rejected the attachment
    DeviceRejected,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::OutOfRange(addr) => {
                write!(f, "no device services address {:#018x}", addr)
            }
            BusError::Full => write!(f, "the bus already holds {} devices", MAX_DEVICES),
            BusError::DeviceRejected => write!(f, "the device rejected initialization"),
        }
    }
}

impl std::error::Error for BusError {}

/// Device category tag
///
/// The bus dispatches through the `BusDevice` trait either way; the kind is
/// reported by `describe` and lets the host tell plain memory apart from
/// anything more exotic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Plain random-access memory
    Memory,
    /// Anything else (timers, MMIO, test doubles)
    Custom,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Memory => write!(f, "memory"),
            DeviceKind::Custom => write!(f, "custom"),
        }
    }
}

/// Capability interface for bus devices
///
/// A device services whole blocks only; the block caches absorb all byte- and
/// word-granular traffic above the bus. Block indices passed to the hooks are
/// relative to the device (0 is the device's first block).
pub trait BusDevice {
    /// The device's category tag
    fn kind(&self) -> DeviceKind;

    /// Called once when the device is added to the bus.
    ///
    /// Returns the size of the device's address range in blocks, or `None`
    /// to refuse the attachment.
    fn init(&mut self) -> Option<u64>;

    /// Copy one block out of the device
    fn read_block(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<(), BusError>;

    /// Copy one block into the device
    fn write_block(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> Result<(), BusError>;

    /// Grant direct access to one block's bytes.
    ///
    /// Returns `None` when the device cannot hand out its storage. The bus
    /// calls `unlock_block` when the caller is done; see
    /// [`AddressBus::with_locked_block`].
    fn lock_block(&mut self, block: u64) -> Option<&mut [u8]>;

    /// Counterpart of `lock_block`. The default does nothing; devices with a
    /// real locking discipline override it.
    fn unlock_block(&mut self, _block: u64) {}
}

/// A device's position on the bus, in whole blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First block the device owns
    pub base_block: u64,
    /// Number of blocks the device owns
    pub blocks: u64,
}

impl BlockRange {
    /// First byte address covered by this range
    pub fn first_byte(&self) -> u64 {
        self.base_block * BLOCK_SIZE as u64
    }

    /// Last byte address covered by this range (inclusive)
    pub fn last_byte(&self) -> u64 {
        (self.base_block + self.blocks) * BLOCK_SIZE as u64 - 1
    }

    /// Whether the byte address falls inside this range
    pub fn contains(&self, addr: u64) -> bool {
        let block = addr / BLOCK_SIZE as u64;
        block >= self.base_block && block < self.base_block + self.blocks
    }
}

struct DeviceSlot {
    range: BlockRange,
    device: Box<dyn BusDevice>,
}

/// Address bus
///
/// Owns the attached devices. Ranges are sorted by base and pairwise
/// non-intersecting by construction: `add_device` only ever appends a new
/// device directly after the current last device's upper bound.
#[derive(Default)]
pub struct AddressBus {
    slots: Vec<DeviceSlot>,
}

impl AddressBus {
    /// Create an empty bus
    pub fn new() -> Self {
        AddressBus { slots: Vec::new() }
    }

    /// Attach a device to the bus.
    ///
    /// Asks the device for its size in blocks via its `init` hook and places
    /// it right after the current last device's upper bound (the first device
    /// lands at address 0). Devices are not inserted into arbitrary gaps.
    ///
    /// # Returns
    ///
    /// The byte address of the device's first block.
    ///
    /// # Errors
    ///
    /// `BusError::Full` when the bus already holds `MAX_DEVICES` devices,
    /// `BusError::DeviceRejected` when `init` refuses or reports zero blocks.
    pub fn add_device(&mut self, mut device: Box<dyn BusDevice>) -> Result<u64, BusError> {
        if self.slots.len() >= MAX_DEVICES {
            return Err(BusError::Full);
        }

        let blocks = device.init().ok_or(BusError::DeviceRejected)?;
        if blocks == 0 {
            return Err(BusError::DeviceRejected);
        }

        let base_block = self
            .slots
            .last()
            .map(|slot| slot.range.base_block + slot.range.blocks)
            .unwrap_or(0);

        let range = BlockRange { base_block, blocks };
        self.slots.push(DeviceSlot { range, device });
        Ok(range.first_byte())
    }

    /// Number of attached devices
    pub fn device_count(&self) -> usize {
        self.slots.len()
    }

    /// The attached devices' ranges, in bus order
    pub fn ranges(&self) -> Vec<BlockRange> {
        self.slots.iter().map(|slot| slot.range).collect()
    }

    /// Render the device map, one line per device
    pub fn describe(&self) -> String {
        let mut out = format!("{} devices:\n", self.slots.len());
        for slot in &self.slots {
            out.push_str(&format!(
                "{:016x} {:016x} ({} blocks, {})\n",
                slot.range.first_byte(),
                slot.range.last_byte(),
                slot.range.blocks,
                slot.device.kind()
            ));
        }
        out
    }

    /// Locate the device owning `addr` and check that a whole block starting
    /// there stays inside its range.
    fn resolve(&mut self, addr: u64) -> Result<(&mut DeviceSlot, u64), BusError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.range.contains(addr))
            .ok_or(BusError::OutOfRange(addr))?;

        let slot = &mut self.slots[index];
        let span_end = addr
            .checked_add(BLOCK_SIZE as u64 - 1)
            .ok_or(BusError::OutOfRange(addr))?;
        if span_end > slot.range.last_byte() {
            return Err(BusError::OutOfRange(addr));
        }

        let block = (addr - slot.range.first_byte()) / BLOCK_SIZE as u64;
        Ok((slot, block))
    }

    /// Read the block at byte address `addr` into `out`
    pub fn read_block(&mut self, addr: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<(), BusError> {
        let (slot, block) = self.resolve(addr)?;
        slot.device.read_block(block, out)
    }

    /// Write `data` to the block at byte address `addr`
    pub fn write_block(&mut self, addr: u64, data: &[u8; BLOCK_SIZE]) -> Result<(), BusError> {
        let (slot, block) = self.resolve(addr)?;
        slot.device.write_block(block, data)
    }

    /// Run `f` with direct access to the block's bytes.
    ///
    /// The device's `lock_block` hook runs before the closure and
    /// `unlock_block` runs after it, so the lock/unlock pairing holds on
    /// every exit path by construction. The bus itself does not mediate
    /// concurrency; the device's own hooks are the discipline.
    pub fn with_locked_block<R>(
        &mut self,
        addr: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BusError> {
        let (slot, block) = self.resolve(addr)?;
        let result = {
            let bytes = slot
                .device
                .lock_block(block)
                .ok_or(BusError::OutOfRange(addr))?;
            f(bytes)
        };
        slot.device.unlock_block(block);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::Ram;
    use std::cell::Cell;
    use std::rc::Rc;

    // ========================================
    // Device Attachment Tests
    // ========================================

    #[test]
    fn test_first_device_lands_at_zero() {
        let mut bus = AddressBus::new();
        let base = bus.add_device(Box::new(Ram::new(4 * BLOCK_SIZE))).unwrap();
        assert_eq!(base, 0, "First device should start at address 0");
        assert_eq!(bus.device_count(), 1);
    }

    #[test]
    fn test_devices_appended_in_ascending_order() {
        let mut bus = AddressBus::new();
        let a = bus.add_device(Box::new(Ram::new(4 * BLOCK_SIZE))).unwrap();
        let b = bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();
        let c = bus.add_device(Box::new(Ram::new(BLOCK_SIZE))).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 4 * BLOCK_SIZE as u64, "Second device starts after the first");
        assert_eq!(c, 6 * BLOCK_SIZE as u64, "Third device starts after the second");
    }

    #[test]
    fn test_ranges_sorted_and_disjoint() {
        let mut bus = AddressBus::new();
        for blocks in [3usize, 1, 5, 2] {
            bus.add_device(Box::new(Ram::new(blocks * BLOCK_SIZE)))
                .unwrap();
        }

        let ranges = bus.ranges();
        for pair in ranges.windows(2) {
            assert!(
                pair[0].base_block < pair[1].base_block,
                "Ranges should be sorted by base"
            );
            assert!(
                pair[0].last_byte() < pair[1].first_byte(),
                "Ranges should not intersect"
            );
        }
    }

    #[test]
    fn test_bus_refuses_more_than_max_devices() {
        let mut bus = AddressBus::new();
        for _ in 0..MAX_DEVICES {
            bus.add_device(Box::new(Ram::new(BLOCK_SIZE))).unwrap();
        }

        let result = bus.add_device(Box::new(Ram::new(BLOCK_SIZE)));
        assert_eq!(result, Err(BusError::Full));
    }

    // ========================================
    // Block Routing Tests
    // ========================================

    #[test]
    fn test_read_write_block_roundtrip() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(4 * BLOCK_SIZE))).unwrap();

        let mut data = [0u8; BLOCK_SIZE];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }

        bus.write_block(BLOCK_SIZE as u64, &data).unwrap();

        let mut readback = [0u8; BLOCK_SIZE];
        bus.read_block(BLOCK_SIZE as u64, &mut readback).unwrap();
        assert_eq!(readback, data);
    }

    #[test]
    fn test_read_routes_to_second_device() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();
        let second = bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();

        let data = [0xAB; BLOCK_SIZE];
        bus.write_block(second, &data).unwrap();

        let mut readback = [0u8; BLOCK_SIZE];
        bus.read_block(second, &mut readback).unwrap();
        assert_eq!(readback, data, "Write to second device should be visible there");

        bus.read_block(0, &mut readback).unwrap();
        assert_eq!(readback, [0u8; BLOCK_SIZE], "First device should be untouched");
    }

    #[test]
    fn test_access_past_all_devices_fails() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        let addr = 2 * BLOCK_SIZE as u64;
        assert_eq!(bus.read_block(addr, &mut out), Err(BusError::OutOfRange(addr)));
    }

    #[test]
    fn test_span_crossing_device_end_fails() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();

        // The address itself is inside the device, but a full block starting
        // there would run past the device's last byte.
        let addr = 2 * BLOCK_SIZE as u64 - 8;
        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(bus.read_block(addr, &mut out), Err(BusError::OutOfRange(addr)));
    }

    #[test]
    fn test_empty_bus_rejects_everything() {
        let mut bus = AddressBus::new();
        let mut out = [0u8; BLOCK_SIZE];
        assert!(bus.read_block(0, &mut out).is_err());
        assert!(bus.write_block(0, &out).is_err());
    }

    // ========================================
    // Block Locking Tests
    // ========================================

    /// Test device that counts its lock/unlock calls
    struct CountingDevice {
        ram: Ram,
        locks: Rc<Cell<u32>>,
        unlocks: Rc<Cell<u32>>,
    }

    impl BusDevice for CountingDevice {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Custom
        }

        fn init(&mut self) -> Option<u64> {
            self.ram.init()
        }

        fn read_block(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<(), BusError> {
            self.ram.read_block(block, out)
        }

        fn write_block(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> Result<(), BusError> {
            self.ram.write_block(block, data)
        }

        fn lock_block(&mut self, block: u64) -> Option<&mut [u8]> {
            self.locks.set(self.locks.get() + 1);
            self.ram.lock_block(block)
        }

        fn unlock_block(&mut self, _block: u64) {
            self.unlocks.set(self.unlocks.get() + 1);
        }
    }

    #[test]
    fn test_locked_block_writes_are_visible() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();

        bus.with_locked_block(BLOCK_SIZE as u64, |bytes| {
            bytes[0] = 0x42;
            bytes[BLOCK_SIZE - 1] = 0x99;
        })
        .unwrap();

        let mut readback = [0u8; BLOCK_SIZE];
        bus.read_block(BLOCK_SIZE as u64, &mut readback).unwrap();
        assert_eq!(readback[0], 0x42);
        assert_eq!(readback[BLOCK_SIZE - 1], 0x99);
    }

    #[test]
    fn test_lock_and_unlock_hooks_pair() {
        let locks = Rc::new(Cell::new(0));
        let unlocks = Rc::new(Cell::new(0));
        let device = CountingDevice {
            ram: Ram::new(BLOCK_SIZE),
            locks: Rc::clone(&locks),
            unlocks: Rc::clone(&unlocks),
        };

        let mut bus = AddressBus::new();
        bus.add_device(Box::new(device)).unwrap();

        bus.with_locked_block(0, |bytes| bytes[0] = 1).unwrap();
        bus.with_locked_block(0, |bytes| bytes[1] = 2).unwrap();

        assert_eq!(locks.get(), 2, "lock_block should run once per access");
        assert_eq!(unlocks.get(), 2, "unlock_block should pair with every lock");
    }

    #[test]
    fn test_lock_outside_any_device_fails() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(BLOCK_SIZE))).unwrap();

        let result = bus.with_locked_block(BLOCK_SIZE as u64, |_| ());
        assert!(result.is_err());
    }

    // ========================================
    // Describe Tests
    // ========================================

    #[test]
    fn test_describe_lists_every_device() {
        let mut bus = AddressBus::new();
        bus.add_device(Box::new(Ram::new(2 * BLOCK_SIZE))).unwrap();
        bus.add_device(Box::new(Ram::new(BLOCK_SIZE))).unwrap();

        let text = bus.describe();
        assert!(text.starts_with("2 devices:"));
        assert!(text.contains("memory"));
        assert_eq!(text.lines().count(), 3, "Header plus one line per device");
    }
}
