//! Bytecode representation for the Lox VM.
//!
//! - `instruction`: OpCode definitions for the bytecode instruction set
//! - `chunk`: Bytecode chunks containing instructions, line info and constant pools
//! - `disassembler`: Debug output for bytecode inspection

pub mod chunk;
pub mod disassembler;
pub mod instruction;

pub use chunk::Chunk;
pub use disassembler::{disassemble, disassemble_instruction};
pub use instruction::{OpCode, UpvalueInfo};
