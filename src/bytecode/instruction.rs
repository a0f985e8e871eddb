//! Bytecode instruction definitions for the Lox VM.

/// Opcodes for the bytecode virtual machine.
///
/// Operands follow the opcode inline. Constant, slot, upvalue and argument-count operands
/// are one byte; jump offsets are two bytes, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // ============ Constants & Stack ============
    /// Push a constant: CONSTANT <index>
    Constant = 0,
    Nil,
    True,
    False,
    /// Pop the top value from the stack
    Pop,

    // ============ Variables ============
    /// GET_LOCAL <slot>
    GetLocal,
    /// SET_LOCAL <slot>
    SetLocal,
    /// GET_GLOBAL <name>
    GetGlobal,
    /// DEFINE_GLOBAL <name>
    DefineGlobal,
    /// SET_GLOBAL <name>
    SetGlobal,
    /// GET_UPVALUE <index>
    GetUpvalue,
    /// SET_UPVALUE <index>
    SetUpvalue,

    // ============ Properties ============
    /// GET_PROPERTY <name>
    GetProperty,
    /// SET_PROPERTY <name>
    SetProperty,
    /// GET_SUPER <name>
    GetSuper,

    // ============ Operators ============
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    Print,

    // ============ Control Flow ============
    /// Unconditional forward jump: JUMP <offset:u16>
    Jump,
    /// Forward jump when the top of stack is falsey; the condition is left on the stack.
    JumpIfFalse,
    /// Backward jump: LOOP <offset:u16>
    Loop,

    // ============ Functions ============
    /// CALL <arg_count>
    Call,
    /// Method call fast path: INVOKE <name> <arg_count>
    Invoke,
    /// SUPER_INVOKE <name> <arg_count>
    SuperInvoke,
    /// CLOSURE <function> followed by one (is_local, index) byte pair per upvalue
    Closure,
    /// Close the upvalue for the top stack slot, then pop it
    CloseUpvalue,
    Return,

    // ============ Classes ============
    /// CLASS <name>
    Class,
    /// Copy the superclass's methods into the subclass below it
    Inherit,
    /// METHOD <name>
    Method,
}

const OPCODES: [OpCode; 37] = [
    OpCode::Constant,
    OpCode::Nil,
    OpCode::True,
    OpCode::False,
    OpCode::Pop,
    OpCode::GetLocal,
    OpCode::SetLocal,
    OpCode::GetGlobal,
    OpCode::DefineGlobal,
    OpCode::SetGlobal,
    OpCode::GetUpvalue,
    OpCode::SetUpvalue,
    OpCode::GetProperty,
    OpCode::SetProperty,
    OpCode::GetSuper,
    OpCode::Equal,
    OpCode::Greater,
    OpCode::Less,
    OpCode::Add,
    OpCode::Subtract,
    OpCode::Multiply,
    OpCode::Divide,
    OpCode::Not,
    OpCode::Negate,
    OpCode::Print,
    OpCode::Jump,
    OpCode::JumpIfFalse,
    OpCode::Loop,
    OpCode::Call,
    OpCode::Invoke,
    OpCode::SuperInvoke,
    OpCode::Closure,
    OpCode::CloseUpvalue,
    OpCode::Return,
    OpCode::Class,
    OpCode::Inherit,
    OpCode::Method,
];

impl OpCode {
    /// Number of inline operand bytes.
    ///
    /// For `Closure` this is only the fixed part; the upvalue pairs that follow depend on
    /// the function constant.
    pub fn operand_size(self) -> usize {
        match self {
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
            | OpCode::Inherit => 0,

            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Call
            | OpCode::Closure
            | OpCode::Class
            | OpCode::Method => 1,

            OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::Invoke
            | OpCode::SuperInvoke => 2,
        }
    }

    /// Convert from u8 to OpCode.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        OPCODES.get(byte as usize).copied()
    }

    /// Upper-case mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "OP_CONSTANT",
            OpCode::Nil => "OP_NIL",
            OpCode::True => "OP_TRUE",
            OpCode::False => "OP_FALSE",
            OpCode::Pop => "OP_POP",
            OpCode::GetLocal => "OP_GET_LOCAL",
            OpCode::SetLocal => "OP_SET_LOCAL",
            OpCode::GetGlobal => "OP_GET_GLOBAL",
            OpCode::DefineGlobal => "OP_DEFINE_GLOBAL",
            OpCode::SetGlobal => "OP_SET_GLOBAL",
            OpCode::GetUpvalue => "OP_GET_UPVALUE",
            OpCode::SetUpvalue => "OP_SET_UPVALUE",
            OpCode::GetProperty => "OP_GET_PROPERTY",
            OpCode::SetProperty => "OP_SET_PROPERTY",
            OpCode::GetSuper => "OP_GET_SUPER",
            OpCode::Equal => "OP_EQUAL",
            OpCode::Greater => "OP_GREATER",
            OpCode::Less => "OP_LESS",
            OpCode::Add => "OP_ADD",
            OpCode::Subtract => "OP_SUBTRACT",
            OpCode::Multiply => "OP_MULTIPLY",
            OpCode::Divide => "OP_DIVIDE",
            OpCode::Not => "OP_NOT",
            OpCode::Negate => "OP_NEGATE",
            OpCode::Print => "OP_PRINT",
            OpCode::Jump => "OP_JUMP",
            OpCode::JumpIfFalse => "OP_JUMP_IF_FALSE",
            OpCode::Loop => "OP_LOOP",
            OpCode::Call => "OP_CALL",
            OpCode::Invoke => "OP_INVOKE",
            OpCode::SuperInvoke => "OP_SUPER_INVOKE",
            OpCode::Closure => "OP_CLOSURE",
            OpCode::CloseUpvalue => "OP_CLOSE_UPVALUE",
            OpCode::Return => "OP_RETURN",
            OpCode::Class => "OP_CLASS",
            OpCode::Inherit => "OP_INHERIT",
            OpCode::Method => "OP_METHOD",
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}

/// Information about an upvalue for closure creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueInfo {
    /// True if this upvalue captures a local in the enclosing function,
    /// false if it captures an upvalue of the enclosing function.
    pub is_local: bool,
    /// The slot of the local, or the index of the enclosing upvalue.
    pub index: u8,
}

impl UpvalueInfo {
    pub fn new(is_local: bool, index: u8) -> Self {
        Self { is_local, index }
    }
}
