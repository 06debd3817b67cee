//! The Pratt parser's precedence table: one row per token kind, naming its
//! prefix handler, infix handler, and binding precedence.

use braid_lexer::TokenKind;

use super::Compiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next tighter-binding precedence, used to parse a binary
    /// operator's right-hand side as left-associative.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

pub struct ParseRule<'src> {
    pub prefix: Option<ParseFn<'src>>,
    pub infix: Option<ParseFn<'src>>,
    pub precedence: Precedence,
}

pub fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    match kind {
        TokenKind::LeftParen => ParseRule { prefix: Some(Compiler::grouping), infix: Some(Compiler::call), precedence: Precedence::Call },
        TokenKind::Minus => ParseRule { prefix: Some(Compiler::unary), infix: Some(Compiler::binary), precedence: Precedence::Term },
        TokenKind::Plus => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Term },
        TokenKind::Slash => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Factor },
        TokenKind::Star => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Factor },
        TokenKind::Bang => ParseRule { prefix: Some(Compiler::unary), infix: None, precedence: Precedence::None },
        TokenKind::BangEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Equality },
        TokenKind::EqualEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Equality },
        TokenKind::Greater => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        TokenKind::GreaterEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        TokenKind::Less => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        TokenKind::LessEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        TokenKind::Identifier => ParseRule { prefix: Some(Compiler::variable), infix: None, precedence: Precedence::None },
        TokenKind::String => ParseRule { prefix: Some(Compiler::string), infix: None, precedence: Precedence::None },
        TokenKind::Number => ParseRule { prefix: Some(Compiler::number), infix: None, precedence: Precedence::None },
        TokenKind::And => ParseRule { prefix: None, infix: Some(Compiler::and), precedence: Precedence::And },
        TokenKind::Or => ParseRule { prefix: None, infix: Some(Compiler::or), precedence: Precedence::Or },
        TokenKind::False | TokenKind::Nil | TokenKind::True => {
            ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: Precedence::None }
        }
        _ => ParseRule { prefix: None, infix: None, precedence: Precedence::None },
    }
}
