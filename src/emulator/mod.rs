// Emulator module - main emulator coordinator
//
// Wires the core together: CPU, address bus with the system RAM, and the
// decoded-block table. Provides the high-level flow the host entry point
// uses: load a flat program image, run it to completion, report how long it
// took.

mod config;

pub use config::{EmulatorConfig, ExecutionConfig, MemoryConfig};

use crate::bus::{AddressBus, BusError, BLOCK_SIZE};
use crate::cpu::blocks::BlockTable;
use crate::cpu::{Cpu, CpuError};
use crate::ram::Ram;
use crate::timer::Timer;
use std::path::Path;

/// What a completed run looked like
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Instructions executed
    pub clock_count: u64,
    /// Wall-clock seconds from start to exit
    pub elapsed_seconds: f64,
}

/// Main emulator structure
///
/// Coordinates the CPU core, the bus, and the decoded-block cache, and owns
/// the configuration they were built from.
pub struct Emulator {
    cpu: Cpu,
    bus: AddressBus,
    blocks: BlockTable,
    config: EmulatorConfig,
}

impl Emulator {
    /// Create an emulator with a single RAM device at address 0.
    ///
    /// The RAM is sized from the configuration; the stack pointer starts at
    /// the top of RAM aligned down to 8 bytes unless the configuration
    /// overrides it.
    ///
    /// # Errors
    ///
    /// Propagates bus setup failures.
    pub fn new(config: EmulatorConfig) -> Result<Self, BusError> {
        let mut bus = AddressBus::new();

        let ram = Ram::new(config.memory.ram_size as usize);
        let ram_size = ram.size() as u64;
        bus.add_device(Box::new(ram))?;

        let mut cpu = Cpu::new();
        cpu.sp = config.execution.initial_sp.unwrap_or(ram_size & !7);
        cpu.trace = config.execution.trace;

        Ok(Emulator {
            cpu,
            bus,
            blocks: BlockTable::new(),
            config,
        })
    }

    /// Load a flat binary image from a file.
    ///
    /// The image lands at address 0 and IP is reset to 0.
    pub fn load_program<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let image = std::fs::read(path)?;
        self.load_program_bytes(&image)?;
        Ok(())
    }

    /// Load a flat binary image from memory.
    ///
    /// The bytes are written block by block through the bus block-lock path,
    /// so the image never takes a detour through the data cache.
    pub fn load_program_bytes(&mut self, image: &[u8]) -> Result<(), BusError> {
        let mut offset = 0usize;
        while offset < image.len() {
            let chunk = (image.len() - offset).min(BLOCK_SIZE);
            self.bus.with_locked_block(offset as u64, |bytes| {
                bytes[..chunk].copy_from_slice(&image[offset..offset + chunk]);
            })?;
            offset += chunk;
        }

        self.cpu.ip = 0;
        Ok(())
    }

    /// Run the loaded program to completion.
    ///
    /// Returns the run summary on a clean exit (HALT or INT 0x80). Any
    /// memory, decode, or math fault aborts the run and surfaces here.
    pub fn run(&mut self) -> Result<RunSummary, CpuError> {
        let timer = Timer::new();

        self.cpu.run(&mut self.bus, &mut self.blocks)?;

        // Make buffered stores visible on the bus before the host looks
        self.cpu.flush_data_cache(&mut self.bus)?;

        Ok(RunSummary {
            clock_count: self.cpu.clock_count,
            elapsed_seconds: timer.elapsed_seconds(),
        })
    }

    /// Get reference to the CPU
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get mutable reference to the CPU
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Get reference to the bus
    pub fn bus(&self) -> &AddressBus {
        &self.bus
    }

    /// Get mutable reference to the bus
    pub fn bus_mut(&mut self) -> &mut AddressBus {
        &mut self.bus
    }

    /// Get reference to the decoded-block table
    pub fn blocks(&self) -> &BlockTable {
        &self.blocks
    }

    /// Get reference to the configuration
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }
}
