//! Bytecode chunk containing instructions and constants.

use crate::bytecode::instruction::OpCode;
use crate::value::Value;

/// A chunk of bytecode with its constant pool and per-byte line table.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// The bytecode instructions.
    pub code: Vec<u8>,
    /// Source line of every byte in `code`.
    pub lines: Vec<usize>,
    /// The constant pool. Append-only; equal constants are not shared.
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw byte to the chunk.
    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Write an opcode to the chunk.
    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op as u8, line);
    }

    /// Write a 16-bit value to the chunk (big-endian).
    pub fn write_u16(&mut self, value: u16, line: usize) {
        let [hi, lo] = value.to_be_bytes();
        self.write(hi, line);
        self.write(lo, line);
    }

    /// Read a big-endian 16-bit value at `offset`.
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Overwrite the two bytes at `offset`.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.code[offset] = hi;
        self.code[offset + 1] = lo;
    }

    /// Add a constant to the pool and return its index.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Source line of the byte at `offset`, or 0 when out of range.
    pub fn line_at(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }
}
