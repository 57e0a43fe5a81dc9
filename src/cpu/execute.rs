// Execute module - dispatch, flag algebra, and the run loop
//
// The execute engine drives fetch-decode-execute: it fetches the decoded
// basic block for the current IP (filling it through the decoder on a miss),
// then walks the block in a tight loop, advancing IP by each instruction's
// recorded size before dispatching it. All operand memory traffic goes
// through the data cache; instruction fetch went through the instruction
// cache at decode time.

use crate::bus::AddressBus;
use crate::cpu::blocks::{BlockTable, MAX_BLOCK};
use crate::cpu::decode::{DecodedInstruction, MemOperand, SrcOperand};
use crate::cpu::disasm;
use crate::cpu::opcodes::{Cond, Op};
use crate::cpu::{flags, Cpu, CpuError, INVALID_ID};

/// Flags word for an arithmetic result
fn arith_flags(result: u64, carry: bool, overflow: bool) -> u16 {
    let mut word = 0;
    if result == 0 {
        word |= flags::ZERO;
    }
    if carry {
        word |= flags::CARRY;
    }
    if overflow {
        word |= flags::OVERFLOW;
    }
    if (result as i64) < 0 {
        word |= flags::SIGN;
    }
    word
}

/// Addition with the full flag set: CARRY on unsigned wrap, OVERFLOW on
/// signed wrap
pub(crate) fn add_with_flags(a: u64, b: u64) -> (u64, u16) {
    let (result, carry) = a.overflowing_add(b);
    let overflow = ((a ^ result) & (b ^ result)) >> 63 != 0;
    (result, arith_flags(result, carry, overflow))
}

/// Subtraction with the full flag set: CARRY on borrow, OVERFLOW on signed
/// wrap. CMP uses the flags and discards the result.
pub(crate) fn sub_with_flags(a: u64, b: u64) -> (u64, u16) {
    let (result, borrow) = a.overflowing_sub(b);
    let overflow = ((a ^ b) & (a ^ result)) >> 63 != 0;
    (result, arith_flags(result, borrow, overflow))
}

/// Multiplication; CARRY and OVERFLOW both report that the product did not
/// fit in 64 bits
pub(crate) fn mul_with_flags(a: u64, b: u64) -> (u64, u16) {
    let (result, overflowed) = a.overflowing_mul(b);
    (result, arith_flags(result, overflowed, overflowed))
}

/// Flags for a bitwise result: ZERO and SIGN recomputed, CARRY and OVERFLOW
/// cleared
pub(crate) fn logic_flags(result: u64) -> u16 {
    arith_flags(result, false, false)
}

/// Unsigned division; divide-by-zero is a math error and stores nothing
fn checked_udiv(a: u64, b: u64) -> Result<u64, CpuError> {
    if b == 0 {
        Err(CpuError::Math)
    } else {
        Ok(a / b)
    }
}

/// Signed division; divide-by-zero and `i64::MIN / -1` are math errors
fn checked_idiv(a: u64, b: u64) -> Result<u64, CpuError> {
    (a as i64)
        .checked_div(b as i64)
        .map(|q| q as u64)
        .ok_or(CpuError::Math)
}

impl Cpu {
    /// Whether the current flags satisfy a predicate
    pub fn cond_satisfied(&self, cond: Cond) -> bool {
        let z = self.flag(flags::ZERO);
        let c = self.flag(flags::CARRY);
        let v = self.flag(flags::OVERFLOW);
        let s = self.flag(flags::SIGN);

        match cond {
            Cond::True => true,
            Cond::Zero => z,
            Cond::NotZero => !z,
            Cond::Carry => c,
            Cond::NotCarry => !c,
            Cond::Overflow => v,
            Cond::NotOverflow => !v,
            Cond::Sign => s,
            Cond::NotSign => !s,
            Cond::Above => !c && !z,
            Cond::BelowOrEqual => c || z,
            Cond::Greater => !z && s == v,
            Cond::LessOrEqual => z || s != v,
            Cond::GreaterOrEqual => s == v,
            Cond::Less => s != v,
        }
    }

    /// Effective address of a memory operand.
    ///
    /// When an index register is present the scale applies to it and the
    /// base is taken unscaled; otherwise the scale applies to the base. An
    /// `INVALID_ID` register contributes zero.
    pub(crate) fn effective_address(&self, mem: &MemOperand) -> u64 {
        let mut addr = mem.displacement as u64;
        let index_present = mem.index_id != INVALID_ID;

        if mem.base_id != INVALID_ID {
            let base = self.reg(mem.base_id);
            addr = addr.wrapping_add(if index_present {
                base
            } else {
                base.wrapping_mul(u64::from(mem.scale))
            });
        }

        if index_present {
            addr = addr.wrapping_add(self.reg(mem.index_id).wrapping_mul(u64::from(mem.scale)));
        }

        addr
    }

    /// Load a memory operand through the data cache, zero-extended to 64 bits
    fn load_operand(&mut self, bus: &mut AddressBus, mem: &MemOperand) -> Result<u64, CpuError> {
        let addr = self.effective_address(mem);
        let mut buf = [0u8; 8];
        let width = 1usize << mem.size;
        self.data_cache.read(bus, addr, &mut buf[..width])?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Resolve the source operand to a 64-bit value
    fn resolve_src(&mut self, bus: &mut AddressBus, instr: &DecodedInstruction) -> Result<u64, CpuError> {
        match instr.src {
            SrcOperand::Immediate(value) => Ok(value),
            SrcOperand::Reg(id) => Ok(self.reg(id)),
            SrcOperand::MemLoad(mem) => self.load_operand(bus, &mem),
            SrcOperand::AddressOf(mem) => Ok(self.effective_address(&mem)),
        }
    }

    /// Service a software interrupt
    fn interrupt(&mut self, index: u8) {
        match index {
            // Dump the machine state to the console and finish the run
            0x80 => {
                print!("{}", self.dump_state());
                self.exit = true;
            }
            // Loop primitive: decrement r0, ZERO tracks whether it hit zero
            0x81 => {
                self.registers[0] = self.registers[0].wrapping_sub(1);
                self.flags &= !flags::ZERO;
                if self.registers[0] == 0 {
                    self.flags |= flags::ZERO;
                }
            }
            // Debug print, no state change
            0x82 => {
                println!("DEBUG PRINT {}", self.clock_count);
            }
            // Every other index is a no-op
            _ => {}
        }
    }

    /// Execute one decoded instruction.
    ///
    /// IP has already been advanced past the instruction. When the predicate
    /// fails the operation is skipped entirely: no side effects, flags
    /// untouched.
    pub fn dispatch(&mut self, bus: &mut AddressBus, instr: &DecodedInstruction) -> Result<(), CpuError> {
        if !self.cond_satisfied(instr.cond) {
            return Ok(());
        }

        match instr.op {
            Op::Halt => {
                self.halt = true;
                self.exit = true;
            }
            Op::Int => {
                let index = self.resolve_src(bus, instr)? as u8;
                self.interrupt(index);
            }
            Op::Mov => {
                let value = self.resolve_src(bus, instr)?;
                self.set_reg(instr.dest, value);
            }
            Op::Str => {
                let mem = match instr.src {
                    SrcOperand::AddressOf(mem) => mem,
                    _ => return Err(CpuError::Decode),
                };
                let addr = self.effective_address(&mem);
                let bytes = self.reg(instr.dest).to_le_bytes();
                let width = 1usize << mem.size;
                self.data_cache.write(bus, addr, &bytes[..width])?;
            }
            Op::Add => {
                let src = self.resolve_src(bus, instr)?;
                let (result, flags) = add_with_flags(self.reg(instr.dest), src);
                self.flags = flags;
                self.set_reg(instr.dest, result);
            }
            Op::Sub => {
                let src = self.resolve_src(bus, instr)?;
                let (result, flags) = sub_with_flags(self.reg(instr.dest), src);
                self.flags = flags;
                self.set_reg(instr.dest, result);
            }
            Op::Cmp => {
                let src = self.resolve_src(bus, instr)?;
                let (_, flags) = sub_with_flags(self.reg(instr.dest), src);
                self.flags = flags;
            }
            Op::Mul => {
                let src = self.resolve_src(bus, instr)?;
                let (result, flags) = mul_with_flags(self.reg(instr.dest), src);
                self.flags = flags;
                self.set_reg(instr.dest, result);
            }
            Op::Div => {
                let src = self.resolve_src(bus, instr)?;
                let result = checked_udiv(self.reg(instr.dest), src)?;
                self.flags = 0;
                self.set_reg(instr.dest, result);
            }
            Op::Idiv => {
                let src = self.resolve_src(bus, instr)?;
                let result = checked_idiv(self.reg(instr.dest), src)?;
                self.flags = 0;
                self.set_reg(instr.dest, result);
            }
            Op::And => {
                let src = self.resolve_src(bus, instr)?;
                let result = self.reg(instr.dest) & src;
                self.flags = logic_flags(result);
                self.set_reg(instr.dest, result);
            }
            Op::Or => {
                let src = self.resolve_src(bus, instr)?;
                let result = self.reg(instr.dest) | src;
                self.flags = logic_flags(result);
                self.set_reg(instr.dest, result);
            }
            Op::Xor => {
                let src = self.resolve_src(bus, instr)?;
                let result = self.reg(instr.dest) ^ src;
                self.flags = logic_flags(result);
                self.set_reg(instr.dest, result);
            }
            Op::Test => {
                let src = self.resolve_src(bus, instr)?;
                self.flags = logic_flags(self.reg(instr.dest) & src);
            }
            Op::Push => {
                let value = self.reg(instr.dest);
                self.sp = self.sp.wrapping_sub(8);
                self.data_cache.write_u64(bus, self.sp, value)?;
            }
            Op::Pop => {
                let value = self.data_cache.read_u64(bus, self.sp)?;
                self.sp = self.sp.wrapping_add(8);
                self.set_reg(instr.dest, value);
            }
            Op::Call => {
                let target = self.resolve_src(bus, instr)?;
                self.sp = self.sp.wrapping_sub(8);
                self.data_cache.write_u64(bus, self.sp, self.ip)?;
                self.ip = target;
            }
            Op::Ret => {
                let value = self.data_cache.read_u64(bus, self.sp)?;
                self.sp = self.sp.wrapping_add(8);
                self.ip = value;
            }
            Op::Rdt => {
                let elapsed = self.timer.elapsed_micros();
                self.set_reg(instr.dest, elapsed);
            }
            Op::Sysinfo => {
                print!("{}", bus.describe());
            }
            Op::Invl => return Err(CpuError::Decode),
        }

        Ok(())
    }

    /// Fetch the block at IP, fill it if it is empty, and execute it.
    ///
    /// The inner loop re-executes the same block as long as its last
    /// instruction moved IP back to the block's start, which keeps tight
    /// loops out of the table lookup entirely. A block that filled to
    /// `MAX_BLOCK` without a branch point falls through to the next-IP block
    /// fetch.
    pub fn step_block(&mut self, bus: &mut AddressBus, blocks: &mut BlockTable) -> Result<(), CpuError> {
        let block_start = self.ip;
        let block = blocks.get_or_insert(block_start);

        if block.instructions.is_empty() {
            loop {
                let at = self.ip;
                let instr = self.decode_next(bus)?;
                if self.trace {
                    println!("{:#010x}: {}", at, disasm::disassemble(&instr));
                }
                let branch = instr.is_branch_point();
                block.instructions.push(instr);
                if branch || block.instructions.len() >= MAX_BLOCK {
                    break;
                }
            }
            // Execution replays the block from its start
            self.ip = block_start;
        }

        while self.ip == block_start && !self.halt && !self.exit {
            for instr in &block.instructions {
                self.clock_count += 1;
                self.ip = self.ip.wrapping_add(u64::from(instr.instruction_size));
                self.dispatch(bus, instr)?;
                if self.halt || self.exit {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run until the program exits, halts, or faults
    pub fn run(&mut self, bus: &mut AddressBus, blocks: &mut BlockTable) -> Result<(), CpuError> {
        while !self.exit && !self.halt {
            self.step_block(bus, blocks)?;
        }
        Ok(())
    }

    /// Write every dirty data-cache line back to the bus
    pub fn flush_data_cache(&mut self, bus: &mut AddressBus) -> Result<(), CpuError> {
        self.data_cache.flush(bus)?;
        Ok(())
    }
}
