//! Bytecode disassembler for debugging.

use std::fmt::{self, Write};

use crate::bytecode::chunk::Chunk;
use crate::bytecode::instruction::OpCode;
use crate::value::{Function, Obj, Value};

/// Disassemble a compiled function, followed by every function nested in its constants.
pub fn disassemble(function: &Function) -> String {
    Disassembly(function).to_string()
}

/// Disassemble the instruction at `offset`.
///
/// Returns the rendered line (without trailing newline) and the offset of the next
/// instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut line = String::new();
    match write_instruction(chunk, offset, &mut line) {
        Ok(next) => (line.trim_end().to_string(), next),
        Err(_) => (format!("{:04} <truncated>", offset), chunk.len()),
    }
}

/// Display adapter over a function's disassembly.
pub struct Disassembly<'a>(pub &'a Function);

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.0;
        match function.display_name() {
            Some(name) => writeln!(f, "== {} ==", name)?,
            None => writeln!(f, "== <script> ==")?,
        }

        let chunk = &function.chunk;
        let mut offset = 0;
        while offset < chunk.len() {
            offset = write_instruction(chunk, offset, f)?;
        }

        for constant in &chunk.constants {
            if let Value::Obj(Obj::Function(nested)) = constant {
                writeln!(f)?;
                write!(f, "{}", Disassembly(nested))?;
            }
        }
        Ok(())
    }
}

fn write_instruction(chunk: &Chunk, offset: usize, out: &mut impl Write) -> Result<usize, fmt::Error> {
    write!(out, "{:04} ", offset)?;

    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", line)?;
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_u8(byte) else {
        writeln!(out, "Unknown opcode {}", byte)?;
        return Ok(offset + 1);
    };
    // Operands of a truncated chunk read as zero rather than panicking.
    let operand = |i: usize| chunk.code.get(offset + i).copied().unwrap_or(0);
    let name = op.name();

    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => {
            let index = operand(1);
            writeln!(out, "{:<16} {:4} '{}'", name, index, constant(chunk, index))?;
            Ok(offset + 2)
        }

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => {
            writeln!(out, "{:<16} {:4}", name, operand(1))?;
            Ok(offset + 2)
        }

        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let jump = u16::from_be_bytes([operand(1), operand(2)]) as usize;
            let target = if op == OpCode::Loop {
                (offset + 3).saturating_sub(jump)
            } else {
                offset + 3 + jump
            };
            writeln!(out, "{:<16} {:4} -> {}", name, offset, target)?;
            Ok(offset + 3)
        }

        OpCode::Invoke | OpCode::SuperInvoke => {
            let index = operand(1);
            let arg_count = operand(2);
            writeln!(
                out,
                "{:<16} ({} args) {:4} '{}'",
                name,
                arg_count,
                index,
                constant(chunk, index)
            )?;
            Ok(offset + 3)
        }

        OpCode::Closure => {
            let index = operand(1);
            writeln!(out, "{:<16} {:4} {}", name, index, constant(chunk, index))?;

            let upvalue_count = match chunk.constants.get(index as usize) {
                Some(Value::Obj(Obj::Function(function))) => function.upvalue_count,
                _ => 0,
            };
            let mut next = offset + 2;
            for _ in 0..upvalue_count {
                let is_local = chunk.code.get(next).copied().unwrap_or(0) != 0;
                let slot = chunk.code.get(next + 1).copied().unwrap_or(0);
                writeln!(
                    out,
                    "{:04}      |                     {} {}",
                    next,
                    if is_local { "local" } else { "upvalue" },
                    slot
                )?;
                next += 2;
            }
            Ok(next)
        }

        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Print
        | OpCode::CloseUpvalue
        | OpCode::Return
        | OpCode::Inherit => {
            writeln!(out, "{}", name)?;
            Ok(offset + 1)
        }
    }
}

fn constant(chunk: &Chunk, index: u8) -> String {
    match chunk.constants.get(index as usize) {
        Some(value) => value.to_string(),
        None => format!("?{}", index),
    }
}
