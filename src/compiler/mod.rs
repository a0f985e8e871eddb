//! Single-pass compiler from Lox source to bytecode.
//!
//! There is no AST: the Pratt parser emits instructions as it recognises each construct.
//! Variable resolution happens at compile time; locals become stack slot indices and
//! captured variables become upvalue indices.

mod classes;
mod expressions;
pub mod precedence;
mod statements;

use std::rc::Rc;

use crate::bytecode::{Chunk, OpCode, UpvalueInfo};
use crate::error::{CompileError, Diagnostic, Location};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::value::{Function, LoxString, Value};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

/// Compile a whole program into the implicit top-level function.
///
/// `file_name` is only used to label diagnostics.
pub fn compile(source: &str, file_name: Option<&str>) -> Result<Function, CompileError> {
    let mut compiler = Compiler::new(source, file_name);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, _) = compiler.end_function();

    if compiler.diagnostics.is_empty() {
        Ok(function)
    } else {
        log::debug!(
            "compilation failed with {} error(s)",
            compiler.diagnostics.len()
        );
        Err(CompileError::new(compiler.diagnostics))
    }
}

/// Tracks what kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable tracked during compilation.
#[derive(Debug, Clone)]
struct Local<'src> {
    name: &'src str,
    /// -1 while declared but not yet initialised.
    depth: i32,
    is_captured: bool,
}

/// Per-function compilation state. Nested function declarations push a new one whose
/// `enclosing` link points at the function they appear in.
struct FunctionCompiler<'src> {
    function: Function,
    kind: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: i32,
    enclosing: Option<Box<FunctionCompiler<'src>>>,
}

impl<'src> FunctionCompiler<'src> {
    fn new(kind: FunctionType, name: Option<Rc<LoxString>>) -> Self {
        // Slot 0 holds the callee; in methods it is the receiver and is reachable as `this`.
        let slot_zero = match kind {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Script | FunctionType::Function => "",
        };
        let mut locals = Vec::with_capacity(MAX_LOCALS);
        locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
        });
        Self {
            function: Function::new(name),
            kind,
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
            enclosing: None,
        }
    }

    fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let Some(enclosing) = self.enclosing.as_deref_mut() else {
            return Ok(None);
        };

        if let Some(slot) = enclosing.resolve_local(name)? {
            enclosing.locals[slot as usize].is_captured = true;
            return self.add_upvalue(slot, true).map(Some);
        }

        if let Some(index) = enclosing.resolve_upvalue(name)? {
            return self.add_upvalue(index, false).map(Some);
        }

        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, &'static str> {
        let info = UpvalueInfo::new(is_local, index);
        if let Some(existing) = self.upvalues.iter().position(|uv| *uv == info) {
            return Ok(existing as u8);
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(info);
        self.function.upvalue_count = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Class nesting, so `this` and `super` can be checked.
struct ClassCompiler {
    has_superclass: bool,
    enclosing: Option<Box<ClassCompiler>>,
}

/// How a variable is accessed at runtime.
#[derive(Debug, Clone, Copy)]
enum VariableAccess {
    Local(u8),
    Upvalue(u8),
    Global(u8),
}

/// Parser state plus the chain of function and class compilers.
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    file_name: Option<String>,
    state: FunctionCompiler<'src>,
    class: Option<Box<ClassCompiler>>,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str, file_name: Option<&str>) -> Self {
        Self {
            scanner: Scanner::new(source),
            current: Token::eof(1),
            previous: Token::eof(1),
            panic_mode: false,
            diagnostics: Vec::new(),
            file_name: file_name.map(str::to_string),
            state: FunctionCompiler::new(FunctionType::Script, None),
            class: None,
        }
    }

    // --- Token stream ---

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // --- Diagnostics ---

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        // Suppress cascades until the parser resynchronises.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let location = match token.kind {
            TokenKind::Eof => Location::AtEnd,
            TokenKind::Error => Location::Unquoted,
            _ => Location::At(token.lexeme.to_string()),
        };
        let diagnostic = Diagnostic::new(token.line, location, message)
            .with_file(self.file_name.as_deref());
        self.diagnostics.push(diagnostic);
    }

    /// Skip tokens until a likely statement boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon || self.current.kind.starts_statement()
            {
                return;
            }
            self.advance();
        }
    }

    // --- Chunk helpers ---

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state.function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().len() - loop_start + 2;
        let offset = match u16::try_from(offset) {
            Ok(offset) => offset,
            Err(_) => {
                self.error("Loop body too large.");
                0
            }
        };
        let line = self.previous.line;
        self.chunk().write_u16(offset, line);
    }

    /// Emit a forward jump with a placeholder offset; returns the offset to patch.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().len() - offset - 2;
        match u16::try_from(jump) {
            Ok(jump) => self.chunk().patch_u16(offset, jump),
            Err(_) => self.error("Too much code to jump over."),
        }
    }

    fn emit_return(&mut self) {
        if self.state.kind == FunctionType::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk().add_constant(value);
        match u8::try_from(index) {
            Ok(index) => index,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, constant);
    }

    // --- Functions ---

    /// Start compiling a nested function named after the previous token.
    fn begin_function(&mut self, kind: FunctionType) {
        let name = Rc::new(LoxString::new(self.previous.lexeme));
        let inner = FunctionCompiler::new(kind, Some(name));
        let outer = std::mem::replace(&mut self.state, inner);
        self.state.enclosing = Some(Box::new(outer));
    }

    /// Finish the current function and restore the enclosing one.
    fn end_function(&mut self) -> (Function, Vec<UpvalueInfo>) {
        self.emit_return();

        let finished = match self.state.enclosing.take() {
            Some(enclosing) => std::mem::replace(&mut self.state, *enclosing),
            None => std::mem::replace(
                &mut self.state,
                FunctionCompiler::new(FunctionType::Script, None),
            ),
        };

        let function = finished.function;
        log::debug!(
            "compiled {} ({} bytes, {} constants, {} upvalues)",
            function,
            function.chunk.len(),
            function.chunk.constants.len(),
            function.upvalue_count
        );
        (function, finished.upvalues)
    }

    // --- Scopes and variables ---

    fn begin_scope(&mut self) {
        self.state.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state.scope_depth -= 1;
        while let Some(local) = self.state.locals.last() {
            if local.depth <= self.state.scope_depth {
                break;
            }
            let op = if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            };
            self.emit_op(op);
            self.state.locals.pop();
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Value::string(name))
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    /// Record a new local named after the previous token. Globals are late bound and need
    /// no declaration.
    fn declare_variable(&mut self) {
        if self.state.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let depth = self.state.scope_depth;
        let duplicate = self
            .state
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth == -1 || local.depth >= depth)
            .any(|local| local.name == name);
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// Parse a variable name; returns its name constant for globals, 0 for locals.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.state.scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        if self.state.scope_depth == 0 {
            return;
        }
        let depth = self.state.scope_depth;
        if let Some(local) = self.state.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.state.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_variable(&mut self, name: &str) -> VariableAccess {
        match self.state.resolve_local(name) {
            Ok(Some(slot)) => return VariableAccess::Local(slot),
            Ok(None) => {}
            Err(message) => {
                self.error(message);
                return VariableAccess::Local(0);
            }
        }
        match self.state.resolve_upvalue(name) {
            Ok(Some(index)) => return VariableAccess::Upvalue(index),
            Ok(None) => {}
            Err(message) => {
                self.error(message);
                return VariableAccess::Upvalue(0);
            }
        }
        VariableAccess::Global(self.identifier_constant(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Obj;

    fn compile_ok(source: &str) -> Function {
        match compile(source, None) {
            Ok(function) => function,
            Err(err) => panic!("unexpected compile error:\n{}", err),
        }
    }

    fn compile_messages(source: &str) -> Vec<String> {
        match compile(source, None) {
            Ok(_) => panic!("expected a compile error"),
            Err(err) => err.diagnostics.into_iter().map(|d| d.message).collect(),
        }
    }

    fn ops(function: &Function) -> Vec<OpCode> {
        let chunk = &function.chunk;
        let mut result = Vec::new();
        let mut offset = 0;
        while offset < chunk.len() {
            let op = OpCode::from_u8(chunk.code[offset]).expect("valid opcode");
            result.push(op);
            offset += 1 + op.operand_size();
            if op == OpCode::Closure {
                let index = chunk.code[offset - 1] as usize;
                if let Value::Obj(Obj::Function(nested)) = &chunk.constants[index] {
                    offset += 2 * nested.upvalue_count;
                }
            }
        }
        result
    }

    fn nested_function(function: &Function, name: &str) -> Rc<Function> {
        function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(Obj::Function(f)) if f.display_name() == Some(name) => Some(f.clone()),
                _ => None,
            })
            .expect("nested function constant")
    }

    #[test]
    fn test_expression_statement() {
        let function = compile_ok("1 + 2 * 3;");
        assert_eq!(
            ops(&function),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Multiply,
                OpCode::Add,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn test_comparison_desugaring() {
        let function = compile_ok("print 1 <= 2;");
        assert_eq!(
            ops(&function)[..4],
            [
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Greater,
                OpCode::Not
            ]
        );
    }

    #[test]
    fn test_lines_track_bytes() {
        let function = compile_ok("print 1;\nprint 2;");
        assert_eq!(function.chunk.lines.len(), function.chunk.code.len());
        assert_eq!(function.chunk.lines[0], 1);
        assert_eq!(function.chunk.lines[3], 2);
    }

    #[test]
    fn test_locals_use_slots() {
        let function = compile_ok("{ var a = 1; var b = a; }");
        assert_eq!(
            ops(&function),
            vec![
                OpCode::Constant,
                OpCode::GetLocal,
                OpCode::Pop,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
        // `a` lives in slot 1; slot 0 is reserved.
        assert_eq!(function.chunk.code[3], 1);
    }

    #[test]
    fn test_captured_local_is_closed() {
        let function = compile_ok("{ var a = 1; fun f() { return a; } }");
        let ops = ops(&function);
        assert!(ops.contains(&OpCode::Closure));
        assert!(ops.contains(&OpCode::CloseUpvalue));

        let f = nested_function(&function, "f");
        assert_eq!(f.upvalue_count, 1);
        assert!(crate::bytecode::disassemble(&f).contains("OP_GET_UPVALUE"));
    }

    #[test]
    fn test_upvalues_are_deduplicated() {
        let function = compile_ok(
            "fun outer() { var x = 1; fun inner() { return x + x; } return inner; }",
        );
        let outer = nested_function(&function, "outer");
        let inner = nested_function(&outer, "inner");
        assert_eq!(inner.upvalue_count, 1);
    }

    #[test]
    fn test_initializer_returns_this() {
        let function = compile_ok("class A { init() {} }");
        let init = nested_function(&function, "init");
        assert_eq!(ops(&init), vec![OpCode::GetLocal, OpCode::Return]);
    }

    #[test]
    fn test_invoke_fast_path() {
        let function = compile_ok("var a; a.m(1, 2);");
        assert!(ops(&function).contains(&OpCode::Invoke));
    }

    #[test]
    fn test_function_arity() {
        let function = compile_ok("fun add(a, b, c) { return a + b + c; }");
        assert_eq!(nested_function(&function, "add").arity, 3);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(compile_messages("1 +;"), vec!["Expect expression."]);
        assert_eq!(compile_messages("1 + 2 = 3;"), vec!["Invalid assignment target."]);
        assert_eq!(compile_messages("return 1;"), vec!["Can't return from top-level code."]);
        assert_eq!(compile_messages("print this;"), vec!["Can't use 'this' outside of a class."]);
        assert_eq!(
            compile_messages("{ var a = 1; var a = 2; }"),
            vec!["Already a variable with this name in this scope."]
        );
        assert_eq!(
            compile_messages("{ var a = a; }"),
            vec!["Can't read local variable in its own initializer."]
        );
        assert_eq!(
            compile_messages("class A < A {}"),
            vec!["A class can't inherit from itself."]
        );
        assert_eq!(
            compile_messages("class A { m() { super.m(); } }"),
            vec!["Can't use 'super' in a class with no superclass."]
        );
        assert_eq!(
            compile_messages("class A { init() { return 1; } }"),
            vec!["Can't return a value from an initializer."]
        );
    }

    #[test]
    fn test_recovers_and_reports_each_statement() {
        let err = compile("print ;\nvar = 1;\nprint 1;", Some("bad.lox")).expect_err("errors");
        assert_eq!(err.diagnostics.len(), 2);
        assert_eq!(err.diagnostics[0].line, 1);
        assert_eq!(err.diagnostics[1].line, 2);
        assert_eq!(
            err.diagnostics[0].to_string(),
            "bad.lox(1): Error at ';': Expect expression."
        );
    }

    #[test]
    fn test_error_at_end() {
        let err = compile("print 1", None).expect_err("missing semicolon");
        assert_eq!(err.diagnostics[0].location, Location::AtEnd);
        assert_eq!(err.diagnostics[0].message, "Expect ';' after value.");
    }

    #[test]
    fn test_scanner_errors_surface() {
        let err = compile("print @;", None).expect_err("bad character");
        assert_eq!(err.diagnostics[0].location, Location::Unquoted);
        assert_eq!(err.diagnostics[0].message, "Unexpected character.");
    }

    #[test]
    fn test_too_many_constants() {
        let source: String = (0..300).map(|i| format!("{};", i)).collect();
        let messages = compile_messages(&source);
        // Every statement past the 256th constant reports on its own.
        assert_eq!(messages.len(), 300 - 256);
        assert!(messages.iter().all(|m| m == "Too many constants in one chunk."));
    }

    #[test]
    fn test_super_outside_class() {
        assert_eq!(
            compile_messages("super.foo();"),
            vec!["Can't use 'super' outside of a class."]
        );
        assert_eq!(
            compile_messages("fun f() { super.foo(); }"),
            vec!["Can't use 'super' outside of a class."]
        );
    }

    #[test]
    fn test_script_slot_zero_is_not_this() {
        let state = FunctionCompiler::new(FunctionType::Script, None);
        assert_eq!(state.resolve_local("this"), Ok(None));
        let state = FunctionCompiler::new(FunctionType::Method, None);
        assert_eq!(state.resolve_local("this"), Ok(Some(0)));
    }

    #[test]
    fn test_too_much_code_to_jump_over() {
        let body = "print nil;".repeat(33_000);
        let source = format!("if (true) {{ {} }}", body);
        assert_eq!(compile_messages(&source), vec!["Too much code to jump over."]);
    }

    #[test]
    fn test_loop_body_too_large() {
        let body = "print nil;".repeat(33_000);
        let source = format!("while (false) {{ {} }}", body);
        assert_eq!(compile_messages(&source), vec!["Loop body too large."]);
    }

    #[test]
    fn test_too_many_locals() {
        // Slot 0 is reserved, so the 256th declaration overflows.
        let vars: String = (0..256).map(|i| format!("var v{};", i)).collect();
        let source = format!("{{ {} }}", vars);
        assert_eq!(
            compile_messages(&source),
            vec!["Too many local variables in function."]
        );
    }

    #[test]
    fn test_too_many_parameters() {
        let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
        let source = format!("fun f({}) {{}}", params.join(", "));
        assert_eq!(
            compile_messages(&source),
            vec!["Can't have more than 255 parameters."]
        );
    }

    #[test]
    fn test_too_many_closure_variables() {
        let outer: String = (0..200).map(|i| format!("var a{};", i)).collect();
        let middle: String = (0..100).map(|i| format!("var b{};", i)).collect();
        let names: Vec<String> = (0..200)
            .map(|i| format!("a{}", i))
            .chain((0..100).map(|i| format!("b{}", i)))
            .collect();
        let source = format!(
            "fun outer() {{ {} fun middle() {{ {} fun inner() {{ print {}; }} }} }}",
            outer,
            middle,
            names.join(" + ")
        );
        assert_eq!(
            compile_messages(&source),
            vec!["Too many closure variables in function."]
        );
    }

    #[test]
    fn test_too_many_arguments() {
        let args: Vec<String> = (0..256).map(|_| "nil".to_string()).collect();
        let source = format!("f({});", args.join(", "));
        assert_eq!(
            compile_messages(&source),
            vec!["Can't have more than 255 arguments."]
        );
    }
}
