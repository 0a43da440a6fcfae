#![forbid(unsafe_code)]

use quill_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwVal,
    KwCell,
    KwType,
    KwTrait,
    KwRecord,
    KwConst,
    KwPriv,
    KwMut,
    KwIf,
    KwElse,
    KwWhile,
    KwExpand,
    KwIn,
    KwBreak,
    KwContinue,
    KwReturn,
    KwAssert,
    KwTrue,
    KwFalse,

    // Operators / punctuation
    Arrow,
    ColonColon,
    Colon,
    Semi,
    Eq,
    EqEq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    AndAnd,
    OrOr,
    Bang,
    Dot,
    Comma,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Newline,
    Indent,
    Dedent,
    Eof,

    // Literals / identifiers
    Ident(String),
    Int(u64),
    Char(char),
    String(String),
}

impl TokenKind {
    /// Opening brackets suppress line structure until they are closed.
    pub fn bracket_delta(&self) -> isize {
        match self {
            TokenKind::LParen | TokenKind::LBrace | TokenKind::LBracket => 1,
            TokenKind::RParen | TokenKind::RBrace | TokenKind::RBracket => -1,
            _ => 0,
        }
    }
}
