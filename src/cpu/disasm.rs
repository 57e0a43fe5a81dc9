// Disasm module - decoded-instruction rendering
//
// Renders the decoder's IR as assembly-ish text for the trace path and for
// fault diagnostics. The output names what the record will actually do, so a
// conditional move to IP prints as a conditional jump.

use crate::cpu::decode::{DecodedInstruction, MemOperand, SrcOperand};
use crate::cpu::opcodes::{Cond, Op};
use crate::cpu::{INVALID_ID, IP_ID, SP_ID};

fn reg_name(id: u8) -> String {
    match id {
        SP_ID => "sp".to_string(),
        IP_ID => "ip".to_string(),
        INVALID_ID => "-".to_string(),
        _ => format!("r{}", id),
    }
}

fn cond_suffix(cond: Cond) -> &'static str {
    match cond {
        Cond::True => "",
        Cond::Zero => ".z",
        Cond::NotZero => ".nz",
        Cond::Carry => ".c",
        Cond::NotCarry => ".nc",
        Cond::Overflow => ".o",
        Cond::NotOverflow => ".no",
        Cond::Sign => ".s",
        Cond::NotSign => ".ns",
        Cond::Above => ".a",
        Cond::BelowOrEqual => ".be",
        Cond::Greater => ".g",
        Cond::LessOrEqual => ".le",
        Cond::GreaterOrEqual => ".ge",
        Cond::Less => ".l",
    }
}

fn mnemonic(op: Op) -> &'static str {
    match op {
        Op::Invl => "invl",
        Op::Halt => "halt",
        Op::Int => "int",
        Op::Mov => "mov",
        Op::Str => "str",
        Op::Add => "add",
        Op::Sub => "sub",
        Op::Mul => "mul",
        Op::Div => "div",
        Op::Idiv => "idiv",
        Op::And => "and",
        Op::Or => "or",
        Op::Xor => "xor",
        Op::Cmp => "cmp",
        Op::Test => "test",
        Op::Push => "push",
        Op::Pop => "pop",
        Op::Rdt => "rdt",
        Op::Call => "call",
        Op::Ret => "ret",
        Op::Sysinfo => "sysinfo",
    }
}

fn mem_string(mem: &MemOperand) -> String {
    let mut terms: Vec<String> = Vec::new();

    if mem.base_id != INVALID_ID {
        if mem.index_id == INVALID_ID && mem.scale != 1 {
            terms.push(format!("{}*{}", reg_name(mem.base_id), mem.scale));
        } else {
            terms.push(reg_name(mem.base_id));
        }
    }
    if mem.index_id != INVALID_ID {
        if mem.scale != 1 {
            terms.push(format!("{}*{}", reg_name(mem.index_id), mem.scale));
        } else {
            terms.push(reg_name(mem.index_id));
        }
    }
    if mem.displacement != 0 || terms.is_empty() {
        if mem.displacement < 0 {
            terms.push(format!("-{:#x}", mem.displacement.unsigned_abs()));
        } else {
            terms.push(format!("{:#x}", mem.displacement));
        }
    }

    format!("[{}]{}", terms.join(" + "), size_suffix(mem.size))
}

fn size_suffix(size: u8) -> &'static str {
    match size {
        0 => ".b",
        1 => ".w",
        2 => ".d",
        _ => "",
    }
}

/// Render one decoded instruction
pub fn disassemble(instr: &DecodedInstruction) -> String {
    let head = format!("{}{}", mnemonic(instr.op), cond_suffix(instr.cond));

    match instr.op {
        Op::Halt | Op::Ret | Op::Sysinfo => head,
        Op::Int => match instr.src {
            SrcOperand::Immediate(index) => format!("{} {:#x}", head, index),
            _ => head,
        },
        Op::Push | Op::Pop | Op::Rdt => format!("{} {}", head, reg_name(instr.dest)),
        Op::Str => match instr.src {
            SrcOperand::AddressOf(mem) => {
                format!("{} {}, {}", head, mem_string(&mem), reg_name(instr.dest))
            }
            _ => head,
        },
        Op::Call => match instr.src {
            SrcOperand::Immediate(target) => format!("{} {:#x}", head, target),
            SrcOperand::Reg(id) => format!("{} {}", head, reg_name(id)),
            _ => head,
        },
        // A move into IP is a jump; name it that way
        Op::Mov if instr.dest == IP_ID => match instr.src {
            SrcOperand::Immediate(target) => format!("jmp{} {:#x}", cond_suffix(instr.cond), target),
            SrcOperand::Reg(id) => format!("jmp{} {}", cond_suffix(instr.cond), reg_name(id)),
            _ => head,
        },
        _ => {
            let src = match instr.src {
                SrcOperand::Immediate(value) => format!("{:#x}", value),
                SrcOperand::Reg(id) => reg_name(id),
                SrcOperand::MemLoad(mem) => mem_string(&mem),
                SrcOperand::AddressOf(mem) => format!("&{}", mem_string(&mem)),
            };
            format!("{} {}, {}", head, reg_name(instr.dest), src)
        }
    }
}
