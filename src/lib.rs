// rm64 - 64-bit register machine emulator
// Core library: fetch, decode, and execute a custom variable-length ISA
// against a memory-mapped device bus, with a decoded-basic-block cache and
// split write-back instruction/data block caches.

// Public modules
pub mod bus;
pub mod cache;
pub mod cpu;
pub mod emulator;
pub mod ram;
pub mod timer;

// Re-export main types for convenience
pub use bus::{AddressBus, BusDevice, BusError, DeviceKind, BLOCK_SIZE, MAX_DEVICES};
pub use cache::{BlockCache, CACHE_LINES};
pub use cpu::blocks::{BasicBlock, BlockTable, MAX_BLOCK};
pub use cpu::decode::{DecodedInstruction, MemOperand, SrcOperand};
pub use cpu::opcodes::{Cond, Op};
pub use cpu::{Cpu, CpuError, GPR_COUNT, INVALID_ID, IP_ID, SP_ID};
pub use emulator::{Emulator, EmulatorConfig, RunSummary};
pub use ram::Ram;
pub use timer::Timer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_components() {
        // Test that all components can be instantiated
        let _cpu = Cpu::new();
        let _bus = AddressBus::new();
        let _cache = BlockCache::new();
        let _blocks = BlockTable::new();
        let _ram = Ram::new(BLOCK_SIZE);
        let _timer = Timer::new();
    }
}
