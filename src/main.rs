// rm64 - Main Entry Point
//
// Loads a flat binary program image into the machine's RAM, runs it to
// completion (halt, exit, or fault), and reports the elapsed wall-clock
// time. The INT 0x80 register dump is the program's own success report.

use clap::Parser;
use rm64::emulator::{Emulator, EmulatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rm64", version, about = "64-bit register machine emulator")]
struct Args {
    /// Program image to execute
    #[arg(default_value = "output.bin")]
    program: PathBuf,

    /// Override the RAM size in bytes
    #[arg(long)]
    ram_size: Option<u64>,

    /// Print each instruction as it is decoded
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = EmulatorConfig::load_or_default();
    if let Some(ram_size) = args.ram_size {
        config.memory.ram_size = ram_size;
    }
    if args.trace {
        config.execution.trace = true;
    }

    let mut emulator = match Emulator::new(config) {
        Ok(emulator) => emulator,
        Err(e) => {
            eprintln!("rm64: bus setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = emulator.load_program(&args.program) {
        eprintln!("rm64: failed to load '{}': {}", args.program.display(), e);
        return ExitCode::FAILURE;
    }

    match emulator.run() {
        Ok(summary) => {
            println!("Time taken: {:.6}", summary.elapsed_seconds);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("rm64: {} at ip {:#x}", e, emulator.cpu().ip);
            ExitCode::FAILURE
        }
    }
}
