//! Bytecode VM for Lox: executes compiled functions on a value stack.
//!
//! The dispatch loop lives in [`vm`]; calls and class operations are split into
//! their own files as further `impl Vm` blocks.

pub mod natives;
pub mod options;
#[allow(clippy::module_inception)]
pub mod vm;
mod vm_calls;
mod vm_classes;

pub use options::{VmOptions, DEFAULT_MAX_FRAMES};
pub use vm::{CallFrame, Output, Vm};
