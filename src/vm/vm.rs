//! The bytecode virtual machine, a stack-based execution engine.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{disassemble_instruction, OpCode};
use crate::compiler::compile;
use crate::error::{LoxError, RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::value::{
    Class, Closure, Function, LoxString, NativeFn, NativeFunction, Obj, Table, Upvalue, Value,
};

use super::natives::NATIVES;
use super::options::VmOptions;

pub(super) type ExecResult<T = ()> = Result<T, RuntimeErrorKind>;

/// A call frame on the VM call stack.
#[derive(Clone)]
pub struct CallFrame {
    /// The closure being executed.
    pub closure: Rc<Closure>,
    /// Instruction pointer (index into the chunk's code).
    pub ip: usize,
    /// Stack index of slot 0 (the callee, or the receiver for methods).
    pub slots: usize,
}

/// Where `print` writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    /// Collect printed lines (for tests and embedding).
    Buffer(Vec<String>),
}

/// The bytecode VM.
pub struct Vm {
    pub(super) stack: Vec<Value>,
    pub(super) frames: Vec<CallFrame>,
    pub(super) globals: Table<Value>,
    /// Upvalues still pointing into the stack, ordered by slot.
    pub(super) open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    pub(super) init_string: Rc<LoxString>,
    output: Output,
    options: VmOptions,
    file_name: Option<String>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(options.max_frames),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string: Rc::new(LoxString::new("init")),
            output: Output::Stdout,
            options,
            file_name: None,
        };
        for (name, arity, function) in NATIVES {
            vm.define_native(name, *arity, *function);
        }
        vm
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn set_output(&mut self, output: Output) {
        self.output = output;
    }

    /// Switch to a buffered output sink.
    pub fn capture_output(&mut self) {
        self.output = Output::Buffer(Vec::new());
    }

    /// Drain lines printed into the buffer; empty when printing to stdout.
    pub fn take_output(&mut self) -> Vec<String> {
        match &mut self.output {
            Output::Buffer(lines) => std::mem::take(lines),
            Output::Stdout => Vec::new(),
        }
    }

    /// Register a host function as a global.
    pub fn define_native(&mut self, name: &str, arity: Option<usize>, function: NativeFn) {
        let native = NativeFunction {
            name: name.to_string(),
            arity,
            function,
        };
        self.globals.set(
            Rc::new(LoxString::new(name)),
            Value::Obj(Obj::Native(Rc::new(native))),
        );
    }

    /// Look up a global variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(&LoxString::new(name)).cloned()
    }

    /// Compile and run `source`. Globals persist across calls.
    pub fn interpret(&mut self, source: &str, file_name: Option<&str>) -> Result<(), LoxError> {
        let function = compile(source, file_name)?;
        self.file_name = file_name.map(str::to_string);
        self.run(function)?;
        Ok(())
    }

    /// Execute a compiled script function.
    ///
    /// On error the stacks are reset, so the VM can run again afterwards.
    pub fn run(&mut self, function: Function) -> Result<(), RuntimeError> {
        self.reset_stack();
        let closure = Rc::new(Closure::new(Rc::new(function), Vec::new()));
        self.push(Value::Obj(Obj::Closure(closure.clone())));

        let result = self.call(closure, 0).and_then(|()| self.execute());
        result.map_err(|kind| self.runtime_error(kind))
    }

    fn reset_stack(&mut self) {
        // Closures that outlive the run keep the values they captured.
        for upvalue in self.open_upvalues.drain(..) {
            let slot = open_slot(&upvalue);
            let value = self.stack.get(slot).cloned().unwrap_or(Value::Nil);
            *upvalue.borrow_mut() = Upvalue::Closed(value);
        }
        self.stack.clear();
        self.frames.clear();
    }

    fn runtime_error(&mut self, kind: RuntimeErrorKind) -> RuntimeError {
        let trace: Vec<TraceFrame> = self
            .frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                line: frame.closure.function.chunk.line_at(frame.ip.saturating_sub(1)),
                function: frame.closure.function.display_name().map(str::to_string),
            })
            .collect();
        let line = trace.first().map_or(0, |frame| frame.line);

        log::debug!("runtime error at line {}: {} ({} frames)", line, kind, trace.len());

        let mut error = RuntimeError::new(kind, line);
        error.file_name = self.file_name.clone();
        if self.options.stack_trace {
            error.trace = trace;
        }
        self.reset_stack();
        error
    }

    // --- Dispatch loop ---

    fn execute(&mut self) -> ExecResult {
        loop {
            if self.options.trace_execution && log::log_enabled!(log::Level::Trace) {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let Some(op) = OpCode::from_u8(byte) else {
                return Err(RuntimeErrorKind::UnknownOpcode(byte));
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().slots + slot].clone();
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    let value = self.peek(0).clone();
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            return Err(RuntimeErrorKind::undefined_variable(name.as_str()));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0).clone();
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0).clone();
                    // Assignment never creates a global; undo the insert.
                    if self.globals.set(name.clone(), value) {
                        self.globals.delete(&name);
                        return Err(RuntimeErrorKind::undefined_variable(name.as_str()));
                    }
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let upvalue = self.frame().closure.upvalues[index].clone();
                    let value = match &*upvalue.borrow() {
                        Upvalue::Open(slot) => self.stack[*slot].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    let upvalue = self.frame().closure.upvalues[index].clone();
                    let mut upvalue = upvalue.borrow_mut();
                    match &mut *upvalue {
                        Upvalue::Open(slot) => self.stack[*slot] = value,
                        Upvalue::Closed(closed) => *closed = value,
                    }
                }

                OpCode::GetProperty => {
                    let name = self.read_string();
                    self.get_property(&name)?;
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    self.set_property(name)?;
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = self.pop_class()?;
                    self.bind_method(&superclass, &name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let Some(n) = self.peek(0).as_number() else {
                        return Err(RuntimeErrorKind::OperandMustBeNumber);
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }

                OpCode::Print => {
                    let value = self.pop();
                    self.print(value.to_string());
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count).clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(&name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    let superclass = self.pop_class()?;
                    self.invoke_from_class(&superclass, &name, arg_count)?;
                }
                OpCode::Closure => self.make_closure(),
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let Some(frame) = self.frames.pop() else {
                        return Ok(());
                    };
                    self.close_upvalues(frame.slots);
                    self.stack.truncate(frame.slots);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }

                OpCode::Class => {
                    let name = self.read_string();
                    self.push(Value::Obj(Obj::Class(Rc::new(Class::new(name)))));
                }
                OpCode::Inherit => self.inherit()?,
                OpCode::Method => {
                    let name = self.read_string();
                    self.define_method(name);
                }
            }
        }
    }

    // --- Operators ---

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> ExecResult {
        let (Some(a), Some(b)) = (self.peek(1).as_number(), self.peek(0).as_number()) else {
            return Err(RuntimeErrorKind::OperandsMustBeNumbers);
        };
        self.pop();
        self.pop();
        self.push(op(a, b));
        Ok(())
    }

    fn add(&mut self) -> ExecResult {
        let result = match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Obj(Obj::String(a)), Value::Obj(Obj::String(b))) => {
                let mut text = String::with_capacity(a.len() + b.len());
                text.push_str(a.as_str());
                text.push_str(b.as_str());
                Value::string(text)
            }
            _ => return Err(RuntimeErrorKind::OperandsMustBeNumbersOrStrings),
        };
        self.pop();
        self.pop();
        self.push(result);
        Ok(())
    }

    fn print(&mut self, text: String) {
        match &mut self.output {
            Output::Stdout => println!("{}", text),
            Output::Buffer(lines) => lines.push(text),
        }
    }

    // --- Closures and upvalues ---

    fn make_closure(&mut self) {
        let function = match self.read_constant() {
            Value::Obj(Obj::Function(function)) => function,
            other => {
                log::warn!("OP_CLOSURE operand is not a function: {}", other);
                Rc::new(Function::new(None))
            }
        };

        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        for _ in 0..function.upvalue_count {
            let is_local = self.read_byte() == 1;
            let index = self.read_byte() as usize;
            let upvalue = if is_local {
                let slot = self.frame().slots + index;
                self.capture_upvalue(slot)
            } else {
                self.frame().closure.upvalues[index].clone()
            };
            upvalues.push(upvalue);
        }

        let closure = Closure::new(function, upvalues);
        self.push(Value::Obj(Obj::Closure(Rc::new(closure))));
    }

    /// Reuse the open upvalue for `slot`, or create one.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        match self
            .open_upvalues
            .binary_search_by_key(&slot, |upvalue| open_slot(upvalue))
        {
            Ok(index) => self.open_upvalues[index].clone(),
            Err(index) => {
                let upvalue = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open_upvalues.insert(index, upvalue.clone());
                upvalue
            }
        }
    }

    /// Close every open upvalue at or above `last`, moving the values off the stack.
    pub(super) fn close_upvalues(&mut self, last: usize) {
        while let Some(upvalue) = self.open_upvalues.last() {
            let slot = open_slot(upvalue);
            if slot < last {
                break;
            }
            let value = self.stack[slot].clone();
            *upvalue.borrow_mut() = Upvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }

    // --- Stack and bytecode helpers ---

    #[inline]
    pub(super) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(super) fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    #[inline]
    pub(super) fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    #[inline]
    fn frame(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    #[inline]
    fn frame_mut(&mut self) -> &mut CallFrame {
        let index = self.frames.len() - 1;
        &mut self.frames[index]
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().closure.function.chunk.constants[index].clone()
    }

    fn read_string(&mut self) -> Rc<LoxString> {
        match self.read_constant() {
            Value::Obj(Obj::String(name)) => name,
            other => Rc::new(LoxString::new(other.to_string())),
        }
    }

    fn pop_class(&mut self) -> ExecResult<Rc<Class>> {
        match self.pop() {
            Value::Obj(Obj::Class(class)) => Ok(class),
            _ => Err(RuntimeErrorKind::SuperclassMustBeClass),
        }
    }

    fn trace_instruction(&self) {
        let stack: String = self
            .stack
            .iter()
            .map(|value| format!("[ {} ]", value))
            .collect();
        let frame = self.frame();
        let (instruction, _) = disassemble_instruction(&frame.closure.function.chunk, frame.ip);
        log::trace!("          {}", stack);
        log::trace!("{}", instruction);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn open_slot(upvalue: &Rc<RefCell<Upvalue>>) -> usize {
    match &*upvalue.borrow() {
        Upvalue::Open(slot) => *slot,
        Upvalue::Closed(_) => usize::MAX,
    }
}
