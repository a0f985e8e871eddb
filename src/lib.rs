//! loxlang: a single-pass bytecode compiler and stack virtual machine for Lox.
//!
//! This is the library root that exports all modules.
//!
//! # Pipeline
//!
//! - **Scanner** (`lexer`): produces tokens on demand
//! - **Compiler** (`compiler`): Pratt parser emitting bytecode straight into chunks
//! - **VM** (`vm`): executes the compiled script on a value stack

#![allow(clippy::module_inception)]
#![allow(clippy::new_without_default)]

pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod repl;
pub mod test;
pub mod value;
pub mod vm;

pub use error::{InterpretResult, LoxError};
pub use value::Value;
pub use vm::{Vm, VmOptions};

/// Compile and run a program on a fresh VM, printing to stdout.
pub fn run(source: &str) -> Result<(), LoxError> {
    run_with_options(source, None, VmOptions::default())
}

/// Compile and run a program with the given VM options.
pub fn run_with_options(
    source: &str,
    file_name: Option<&str>,
    options: VmOptions,
) -> Result<(), LoxError> {
    let mut vm = Vm::with_options(options);
    vm.interpret(source, file_name)
}

/// Compile source code to bytecode without executing.
pub fn compile(source: &str) -> Result<value::Function, error::CompileError> {
    compiler::compile(source, None)
}

/// Compile source code and disassemble the script and every nested function.
pub fn disassemble(source: &str) -> Result<String, error::CompileError> {
    let function = compiler::compile(source, None)?;
    Ok(bytecode::disassemble(&function))
}

/// Scan source code into a token list, up to and including `Eof`.
pub fn tokenize(source: &str) -> Vec<lexer::Token<'_>> {
    lexer::Scanner::new(source).scan_tokens()
}
