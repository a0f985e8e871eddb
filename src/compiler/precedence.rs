//! Operator precedence for Pratt parsing.

/// Operator precedence levels (higher = tighter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None = 0,
    Assignment = 1, // =
    Or = 2,         // or
    And = 3,        // and
    Equality = 4,   // == !=
    Comparison = 5, // < > <= >=
    Term = 6,       // + -
    Factor = 7,     // * /
    Unary = 8,      // ! -
    Call = 9,       // . ()
    Primary = 10,
}

impl Precedence {
    /// The next tighter level; binary operators parse their right operand at this level
    /// so they associate to the left.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// A parse function; the flag says whether an assignment may follow.
pub type ParseFn<C> = fn(&mut C, bool);

/// One row of the Pratt table.
pub struct ParseRule<C> {
    pub prefix: Option<ParseFn<C>>,
    pub infix: Option<ParseFn<C>>,
    pub precedence: Precedence,
}

impl<C> ParseRule<C> {
    pub fn new(
        prefix: Option<ParseFn<C>>,
        infix: Option<ParseFn<C>>,
        precedence: Precedence,
    ) -> Self {
        Self {
            prefix,
            infix,
            precedence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Term < Precedence::Factor);
        assert!(Precedence::Call < Precedence::Primary);
    }

    #[test]
    fn test_next() {
        assert_eq!(Precedence::Term.next(), Precedence::Factor);
        assert_eq!(Precedence::Primary.next(), Precedence::Primary);
    }
}
