//! Expression parsing: the Pratt table and its prefix/infix functions.

use super::precedence::{ParseRule, Precedence};
use super::{Compiler, VariableAccess};
use crate::bytecode::OpCode;
use crate::lexer::TokenKind;
use crate::value::Value;

impl<'src> Compiler<'src> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn rule(kind: TokenKind) -> ParseRule<Self> {
        use Precedence as P;
        use TokenKind as T;

        match kind {
            T::LeftParen => ParseRule::new(Some(Self::grouping), Some(Self::call), P::Call),
            T::Dot => ParseRule::new(None, Some(Self::dot), P::Call),
            T::Minus => ParseRule::new(Some(Self::unary), Some(Self::binary), P::Term),
            T::Plus => ParseRule::new(None, Some(Self::binary), P::Term),
            T::Slash | T::Star => ParseRule::new(None, Some(Self::binary), P::Factor),
            T::Bang => ParseRule::new(Some(Self::unary), None, P::None),
            T::BangEqual | T::EqualEqual => ParseRule::new(None, Some(Self::binary), P::Equality),
            T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
                ParseRule::new(None, Some(Self::binary), P::Comparison)
            }
            T::Identifier => ParseRule::new(Some(Self::variable), None, P::None),
            T::String => ParseRule::new(Some(Self::string), None, P::None),
            T::Number => ParseRule::new(Some(Self::number), None, P::None),
            T::And => ParseRule::new(None, Some(Self::and), P::And),
            T::Or => ParseRule::new(None, Some(Self::or), P::Or),
            T::False | T::Nil | T::True => ParseRule::new(Some(Self::literal), None, P::None),
            T::Super => ParseRule::new(Some(Self::super_), None, P::None),
            T::This => ParseRule::new(Some(Self::this), None, P::None),
            _ => ParseRule::new(None, None, P::None),
        }
    }

    /// Parse any expression at `precedence` or tighter.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Strip the surrounding quotes.
        let text = &lexeme[1..lexeme.len() - 1];
        self.emit_constant(Value::string(text));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule(operator).precedence;
        self.parse_precedence(precedence.next());

        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    /// `and` short-circuits: a falsey left operand is the result.
    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut arg_count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count.min(255) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    pub(super) fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_variable(name) {
            VariableAccess::Local(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            VariableAccess::Upvalue(index) => (OpCode::GetUpvalue, OpCode::SetUpvalue, index),
            VariableAccess::Global(constant) => (OpCode::GetGlobal, OpCode::SetGlobal, constant),
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    fn this(&mut self, _can_assign: bool) {
        if self.class.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_(&mut self, _can_assign: bool) {
        let misuse = match &self.class {
            None => Some("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                Some("Can't use 'super' in a class with no superclass.")
            }
            Some(_) => None,
        };
        if let Some(message) = misuse {
            self.error(message);
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::SuperInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::GetSuper, name);
        }
    }
}
