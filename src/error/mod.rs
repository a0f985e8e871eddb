//! Error types for compilation and execution.

use std::fmt;

use thiserror::Error;

/// Where in the source a compile diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// At a concrete token, holding its lexeme.
    At(String),
    AtEnd,
    /// The offending token was itself a scanner error; there is nothing to quote.
    Unquoted,
}

/// A single compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}", prefix(.file_name, .line), self.describe())]
pub struct Diagnostic {
    pub line: usize,
    pub location: Location,
    pub message: String,
    pub file_name: Option<String>,
}

impl Diagnostic {
    pub fn new(line: usize, location: Location, message: impl Into<String>) -> Self {
        Self {
            line,
            location,
            message: message.into(),
            file_name: None,
        }
    }

    pub fn with_file(mut self, file_name: Option<&str>) -> Self {
        self.file_name = file_name.map(str::to_string);
        self
    }

    /// The diagnostic without its line prefix, e.g. `Error at 'x': Expect ';' after value.`.
    pub fn describe(&self) -> String {
        match &self.location {
            Location::At(lexeme) => format!("Error at '{}': {}", lexeme, self.message),
            Location::AtEnd => format!("Error at end: {}", self.message),
            Location::Unquoted => format!("Error: {}", self.message),
        }
    }
}

/// Bytecode compilation failed. Every diagnostic reported during the pass is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_lines(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn first_message(&self) -> Option<&str> {
        self.diagnostics.first().map(|d| d.message.as_str())
    }
}

/// The ways execution can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,

    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,

    #[error("Operands must be two numbers or two strings.")]
    OperandsMustBeNumbersOrStrings,

    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),

    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),

    #[error("Only instances have properties.")]
    OnlyInstancesHaveProperties,

    #[error("Only instances have fields.")]
    OnlyInstancesHaveFields,

    #[error("Only instances have methods.")]
    OnlyInstancesHaveMethods,

    #[error("Can only call functions and classes.")]
    NotCallable,

    #[error("Expected {expected} arguments but got {got}.")]
    WrongArity { expected: usize, got: usize },

    #[error("Stack overflow.")]
    StackOverflow,

    #[error("Superclass must be a class.")]
    SuperclassMustBeClass,

    #[error("Unknown opcode {0}.")]
    UnknownOpcode(u8),
}

impl RuntimeErrorKind {
    pub fn undefined_variable(name: impl Into<String>) -> Self {
        Self::UndefinedVariable(name.into())
    }

    pub fn undefined_property(name: impl Into<String>) -> Self {
        Self::UndefinedProperty(name.into())
    }

    pub fn wrong_arity(expected: usize, got: usize) -> Self {
        Self::WrongArity { expected, got }
    }
}

/// One entry of the call stack captured when a runtime error is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    /// `None` for the top-level script.
    pub function: Option<String>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error, with the line it happened on and the call stack at that point
/// (innermost frame first).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{kind}", prefix(.file_name, .line))]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub line: usize,
    pub file_name: Option<String>,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, line: usize) -> Self {
        Self {
            kind,
            line,
            file_name: None,
            trace: Vec::new(),
        }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// The message followed by one line per trace frame.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for frame in &self.trace {
            out.push('\n');
            out.push_str(&frame.to_string());
        }
        out
    }
}

/// A unified error type for everything the interpreter can fail with.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoxError {
    /// Conventional sysexits code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Compile(_) => 65,
            Self::Runtime(_) => 70,
            Self::Io(_) => 74,
        }
    }
}

/// Coarse outcome of interpreting a piece of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl<T> From<&Result<T, LoxError>> for InterpretResult {
    fn from(result: &Result<T, LoxError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(LoxError::Compile(_)) => Self::CompileError,
            Err(LoxError::Runtime(_)) | Err(LoxError::Io(_)) => Self::RuntimeError,
        }
    }
}

fn prefix(file_name: &Option<String>, line: &usize) -> String {
    match file_name {
        Some(name) => format!("{}({}): ", name, line),
        None => String::new(),
    }
}

fn join_lines(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match d.file_name {
            Some(_) => d.to_string(),
            None => format!("[line {}] {}", d.line, d.describe()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_rendering() {
        let d = Diagnostic::new(3, Location::At("x".into()), "Expect ';' after value.");
        assert_eq!(d.describe(), "Error at 'x': Expect ';' after value.");
        assert_eq!(
            d.clone().with_file(Some("main.lox")).to_string(),
            "main.lox(3): Error at 'x': Expect ';' after value."
        );
        let err = CompileError::new(vec![d]);
        assert_eq!(err.to_string(), "[line 3] Error at 'x': Expect ';' after value.");
    }

    #[test]
    fn test_runtime_error_report() {
        let mut err = RuntimeError::new(RuntimeErrorKind::wrong_arity(2, 1), 4);
        err.trace = vec![
            TraceFrame {
                line: 4,
                function: Some("add".into()),
            },
            TraceFrame {
                line: 7,
                function: None,
            },
        ];
        assert_eq!(
            err.report(),
            "Expected 2 arguments but got 1.\n[line 4] in add()\n[line 7] in script"
        );
        err.file_name = Some("f.lox".into());
        assert_eq!(err.to_string(), "f.lox(4): Expected 2 arguments but got 1.");
    }

    #[test]
    fn test_exit_codes() {
        let compile: LoxError = CompileError::new(Vec::new()).into();
        let runtime: LoxError = RuntimeError::new(RuntimeErrorKind::StackOverflow, 1).into();
        assert_eq!(compile.exit_code(), 65);
        assert_eq!(runtime.exit_code(), 70);
        assert_eq!(
            InterpretResult::from(&Err::<(), _>(runtime)),
            InterpretResult::RuntimeError
        );
    }
}
