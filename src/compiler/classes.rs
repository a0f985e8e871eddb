//! Class declaration compilation.

use super::{ClassCompiler, Compiler, FunctionType};
use crate::bytecode::OpCode;
use crate::lexer::TokenKind;

impl<'src> Compiler<'src> {
    pub(super) fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        let enclosing = self.class.take();
        self.class = Some(Box::new(ClassCompiler {
            has_superclass: false,
            enclosing,
        }));

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.named_variable(self.previous.lexeme, false);

            if class_name == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // `super` is a local in a scope wrapping the class body, so every method
            // captures the same superclass.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.class.as_deref_mut() {
                class.has_superclass = true;
            }
        }

        // The class sits on the stack while its methods are attached.
        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self.class.as_ref().is_some_and(|c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }

        self.class = self.class.take().and_then(|class| class.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);

        let kind = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(kind);
        self.emit_op_byte(OpCode::Method, constant);
    }
}
