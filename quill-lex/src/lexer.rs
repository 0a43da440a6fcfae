#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use logos::Logos;
use miette::Diagnostic;
use quill_ast::{Span, span_between};
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(quill::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \f\r]+")]
enum RawToken {
    #[token("val")]
    KwVal,
    #[token("cell")]
    KwCell,
    #[token("type")]
    KwType,
    #[token("trait")]
    KwTrait,
    #[token("record")]
    KwRecord,
    #[token("const")]
    KwConst,
    #[token("priv")]
    KwPriv,
    #[token("mut")]
    KwMut,
    #[token("if")]
    KwIf,
    #[token("else")]
    KwElse,
    #[token("while")]
    KwWhile,
    #[token("expand")]
    KwExpand,
    #[token("in")]
    KwIn,
    #[token("break")]
    KwBreak,
    #[token("continue")]
    KwContinue,
    #[token("return")]
    KwReturn,
    #[token("assert")]
    KwAssert,
    #[token("true")]
    KwTrue,
    #[token("false")]
    KwFalse,

    #[token("->")]
    Arrow,
    #[token("::")]
    ColonColon,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("=")]
    Eq,
    #[token(",")]
    Comma,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"0b[01_]+", |lex| parse_int_prefixed(lex.slice(), 2, 2))]
    #[regex(r"0o[0-7_]+", |lex| parse_int_prefixed(lex.slice(), 8, 2))]
    #[regex(r"0x[0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16, 2))]
    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<u64>),

    // Supported escapes: \n, \t, \r, \0, \', \", \\, and \u{HEX} (1-6 hex digits)
    #[regex(r#"'([^'\\]|\\[^u]|\\u\{[0-9a-fA-F]+\})'"#, parse_char)]
    Char(Option<char>),

    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    String(Option<String>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<u64> {
    let digits = strip_underscores(s)?;
    digits.parse::<u64>().ok()
}

fn parse_int_prefixed(s: &str, radix: u32, prefix_len: usize) -> Option<u64> {
    let rest = s.get(prefix_len..)?;
    let digits = strip_underscores(rest)?;
    u64::from_str_radix(&digits, radix).ok()
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

fn unescape(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let esc = chars.next()?;
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'u' => {
                if chars.next() != Some('{') {
                    return None;
                }
                let mut hex = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    chars.next();
                    if hex.len() > 6 {
                        return None;
                    }
                }
                if chars.next() != Some('}') || hex.is_empty() {
                    return None;
                }
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(cp)?);
            }
            _ => return None,
        }
    }

    Some(out)
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    unescape(&s[1..s.len().saturating_sub(1)])
}

fn parse_char(lex: &mut logos::Lexer<RawToken>) -> Option<char> {
    let s = lex.slice();
    let text = unescape(&s[1..s.len().saturating_sub(1)])?;
    let mut chars = text.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

/// Byte offset where a `#` or `//` comment starts, ignoring comment markers
/// inside string and char literals.
fn comment_start(code: &str) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'#' => return Some(i),
                b'/' if bytes.get(i + 1) == Some(&b'/') => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut indent_stack: Vec<usize> = vec![0];
        // Open (, [ and { continue the logical line across physical lines.
        let mut bracket_depth: isize = 0;

        let mut line_start = 0usize;

        for line in self.src.split_inclusive('\n') {
            let line_len = line.len();
            let line_end = line_start + line_len;

            let mut content = line;
            if content.ends_with('\n') {
                content = &content[..content.len() - 1];
            }

            if content.trim().is_empty() {
                line_start = line_end;
                continue;
            }

            if content.as_bytes().contains(&b'\t') {
                return Err(LexError {
                    message: "tabs are not allowed; use spaces".to_string(),
                    span: span_between(line_start, line_end),
                });
            }

            let leading_spaces = content
                .as_bytes()
                .iter()
                .take_while(|b| **b == b' ')
                .count();

            let mut code = &content[leading_spaces..];
            if let Some(idx) = comment_start(code) {
                code = &code[..idx];
            }
            if code.trim().is_empty() {
                line_start = line_end;
                continue;
            }

            if bracket_depth == 0 {
                let current_indent = *indent_stack.last().unwrap_or(&0);
                if leading_spaces > current_indent {
                    indent_stack.push(leading_spaces);
                    tokens.push(Token {
                        kind: TokenKind::Indent,
                        span: span_between(line_start, line_start + leading_spaces),
                    });
                } else if leading_spaces < current_indent {
                    while let Some(&top) = indent_stack.last() {
                        if leading_spaces >= top {
                            break;
                        }
                        indent_stack.pop();
                        tokens.push(Token {
                            kind: TokenKind::Dedent,
                            span: span_between(line_start, line_start + leading_spaces),
                        });
                    }
                    if *indent_stack.last().unwrap_or(&usize::MAX) != leading_spaces {
                        return Err(LexError {
                            message: "inconsistent indentation".to_string(),
                            span: span_between(line_start, line_end),
                        });
                    }
                }
            }

            let mut lex = RawToken::lexer(code);
            while let Some(raw) = lex.next() {
                let span_in_line = lex.span();
                let abs_start = line_start + leading_spaces + span_in_line.start;
                let abs_end = line_start + leading_spaces + span_in_line.end;
                let here = span_between(abs_start, abs_end);

                let kind = match raw {
                    Ok(RawToken::KwVal) => TokenKind::KwVal,
                    Ok(RawToken::KwCell) => TokenKind::KwCell,
                    Ok(RawToken::KwType) => TokenKind::KwType,
                    Ok(RawToken::KwTrait) => TokenKind::KwTrait,
                    Ok(RawToken::KwRecord) => TokenKind::KwRecord,
                    Ok(RawToken::KwConst) => TokenKind::KwConst,
                    Ok(RawToken::KwPriv) => TokenKind::KwPriv,
                    Ok(RawToken::KwMut) => TokenKind::KwMut,
                    Ok(RawToken::KwIf) => TokenKind::KwIf,
                    Ok(RawToken::KwElse) => TokenKind::KwElse,
                    Ok(RawToken::KwWhile) => TokenKind::KwWhile,
                    Ok(RawToken::KwExpand) => TokenKind::KwExpand,
                    Ok(RawToken::KwIn) => TokenKind::KwIn,
                    Ok(RawToken::KwBreak) => TokenKind::KwBreak,
                    Ok(RawToken::KwContinue) => TokenKind::KwContinue,
                    Ok(RawToken::KwReturn) => TokenKind::KwReturn,
                    Ok(RawToken::KwAssert) => TokenKind::KwAssert,
                    Ok(RawToken::KwTrue) => TokenKind::KwTrue,
                    Ok(RawToken::KwFalse) => TokenKind::KwFalse,

                    Ok(RawToken::Arrow) => TokenKind::Arrow,
                    Ok(RawToken::ColonColon) => TokenKind::ColonColon,

                    Ok(RawToken::EqEq) => TokenKind::EqEq,
                    Ok(RawToken::Neq) => TokenKind::Neq,
                    Ok(RawToken::Le) => TokenKind::Le,
                    Ok(RawToken::Ge) => TokenKind::Ge,
                    Ok(RawToken::Lt) => TokenKind::Lt,
                    Ok(RawToken::Gt) => TokenKind::Gt,

                    Ok(RawToken::AndAnd) => TokenKind::AndAnd,
                    Ok(RawToken::OrOr) => TokenKind::OrOr,
                    Ok(RawToken::Bang) => TokenKind::Bang,

                    Ok(RawToken::Plus) => TokenKind::Plus,
                    Ok(RawToken::Minus) => TokenKind::Minus,
                    Ok(RawToken::Star) => TokenKind::Star,
                    Ok(RawToken::Slash) => TokenKind::Slash,
                    Ok(RawToken::Percent) => TokenKind::Percent,

                    Ok(RawToken::Dot) => TokenKind::Dot,
                    Ok(RawToken::Colon) => TokenKind::Colon,
                    Ok(RawToken::Semi) => TokenKind::Semi,
                    Ok(RawToken::Eq) => TokenKind::Eq,
                    Ok(RawToken::Comma) => TokenKind::Comma,

                    Ok(RawToken::LParen) => TokenKind::LParen,
                    Ok(RawToken::RParen) => TokenKind::RParen,
                    Ok(RawToken::LBrace) => TokenKind::LBrace,
                    Ok(RawToken::RBrace) => TokenKind::RBrace,
                    Ok(RawToken::LBracket) => TokenKind::LBracket,
                    Ok(RawToken::RBracket) => TokenKind::RBracket,

                    Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
                    Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                    Ok(RawToken::Int(None)) => {
                        return Err(LexError {
                            message: "invalid integer literal".to_string(),
                            span: here,
                        });
                    }
                    Ok(RawToken::Char(Some(c))) => TokenKind::Char(c),
                    Ok(RawToken::Char(None)) => {
                        return Err(LexError {
                            message: "invalid char literal".to_string(),
                            span: here,
                        });
                    }
                    Ok(RawToken::String(Some(s))) => TokenKind::String(s),
                    Ok(RawToken::String(None)) => {
                        return Err(LexError {
                            message: "invalid string literal".to_string(),
                            span: here,
                        });
                    }

                    Err(_) => {
                        return Err(LexError {
                            message: "unexpected token".to_string(),
                            span: here,
                        });
                    }
                };

                bracket_depth += kind.bracket_delta();
                if bracket_depth < 0 {
                    return Err(LexError {
                        message: "unbalanced closing bracket".to_string(),
                        span: here,
                    });
                }

                tokens.push(Token { kind, span: here });
            }

            if bracket_depth == 0 {
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    span: span_between(line_end, line_end),
                });
            }

            line_start = line_end;
        }

        if bracket_depth > 0 {
            return Err(LexError {
                message: "unclosed bracket at end of input".to_string(),
                span: span_between(self.src.len(), self.src.len()),
            });
        }

        while indent_stack.len() > 1 {
            indent_stack.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: span_between(self.src.len(), self.src.len()),
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }
}
