//! Lexer: turns a source byte buffer into a flat token stream.
//!
//! Hand-rolled single-pass scanner: a cursor over a borrowed buffer, no
//! regex crate, no lexer-generator. The token-kind set below is closed,
//! just every punctuator and keyword the grammar needs and nothing else.

use crate::error::{CompileError, CompileResult, Pos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Ident,
    Number,
    String,

    // Keywords
    Fn,
    Let,
    If,
    Else,
    For,
    While,
    Return,
    Struct,
    Mut,

    // Punctuators
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Colon,
    Comma,
    Dot,
    Amp,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Arrow,
    AndAnd,
    OrOr,
    Bang,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
}

/// A single lexeme. Borrows from the source buffer; `text` is a plain slice
/// rather than an owned `String` so the token stream can't outlive its
/// source.
#[derive(Debug, Clone, Copy)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub text: &'s str,
    pub line: usize,
    pub col: usize,
}

impl<'s> Token<'s> {
    pub fn pos(&self) -> Pos {
        Pos { line: self.line, col: self.col }
    }
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("fn", TokenKind::Fn),
    ("let", TokenKind::Let),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("for", TokenKind::For),
    ("while", TokenKind::While),
    ("return", TokenKind::Return),
    ("struct", TokenKind::Struct),
    ("mut", TokenKind::Mut),
];

fn keyword(s: &str) -> Option<TokenKind> {
    KEYWORDS.iter().find(|(k, _)| *k == s).map(|(_, t)| *t)
}

pub struct Lexer<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s str) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0, line: 1, col: 1 }
    }

    /// Tokenize the entire buffer, ending in a single `Eof` sentinel.
    pub fn tokenize(mut self) -> CompileResult<Vec<Token<'s>>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let line = self.line;
            let col = self.col;
            let Some(c) = self.peek() else {
                out.push(Token { kind: TokenKind::Eof, text: "", line, col });
                break;
            };

            let kind = if is_ident_start(c) {
                self.scan_ident()
            } else if c.is_ascii_digit() {
                self.scan_number()
            } else if c == b'"' {
                self.scan_string(line, col)?
            } else {
                self.scan_operator(line, col)?
            };

            out.push(Token { kind, text: &self.src[start..self.pos], line, col });
        }
        Ok(out)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        keyword(text).unwrap_or(TokenKind::Ident)
    }

    fn scan_number(&mut self) -> TokenKind {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        TokenKind::Number
    }

    fn scan_string(&mut self, line: usize, col: usize) -> CompileResult<TokenKind> {
        self.advance(); // opening quote
        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::lex(
                        Pos { line, col },
                        "unterminated string literal",
                    ))
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    // Escape pair is stored verbatim; the lexer does not
                    // interpret it, codegen handles it at emission time.
                    self.advance();
                    if self.peek().is_none() {
                        return Err(CompileError::lex(
                            Pos { line, col },
                            "unterminated string literal",
                        ));
                    }
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        Ok(TokenKind::String)
    }

    fn scan_operator(&mut self, line: usize, col: usize) -> CompileResult<TokenKind> {
        let c = self.advance().unwrap();
        let two = |l: &mut Self, expect: u8, yes: TokenKind, no: TokenKind| -> TokenKind {
            if l.peek() == Some(expect) {
                l.advance();
                yes
            } else {
                no
            }
        };
        use TokenKind::*;
        Ok(match c {
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b':' => Colon,
            b',' => Comma,
            b'.' => Dot,
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.advance();
                    AndAnd
                } else {
                    Amp
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.advance();
                    OrOr
                } else {
                    return Err(CompileError::lex(
                        Pos { line, col },
                        "unexpected byte '|'",
                    ));
                }
            }
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.advance();
                    PlusPlus
                } else {
                    two(self, b'=', PlusEq, Plus)
                }
            }
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.advance();
                    MinusMinus
                } else if self.peek() == Some(b'>') {
                    self.advance();
                    Arrow
                } else {
                    two(self, b'=', MinusEq, Minus)
                }
            }
            b'*' => two(self, b'=', StarEq, Star),
            b'/' => two(self, b'=', SlashEq, Slash),
            b'%' => two(self, b'=', PercentEq, Percent),
            b'=' => two(self, b'=', EqEq, Eq),
            b'!' => two(self, b'=', Neq, Bang),
            b'<' => two(self, b'=', Lte, Lt),
            b'>' => two(self, b'=', Gte, Gt),
            other => {
                return Err(CompileError::lex(
                    Pos { line, col },
                    format!("unexpected byte '{}'", other as char),
                ))
            }
        })
    }
}

/// Expand the verbatim escape pairs a string literal's lexeme carries (the
/// lexer stores `\n` as the two bytes `\` and `n`, uninterpreted) into the
/// actual bytes codegen writes to the string pool.
pub fn unescape_string(raw: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.bytes();
    while let Some(b) = chars.next() {
        if b == b'\\' {
            match chars.next() {
                Some(b'n') => out.push(b'\n'),
                Some(b't') => out.push(b'\t'),
                Some(b'r') => out.push(b'\r'),
                Some(b'0') => out.push(0),
                Some(b'\\') => out.push(b'\\'),
                Some(b'"') => out.push(b'"'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(b);
        }
    }
    out
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_keywords_and_idents() {
        use TokenKind::*;
        assert_eq!(kinds("fn main let x"), vec![Fn, Ident, Let, Ident, Eof]);
    }

    #[test]
    fn tokenizes_multi_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("&& || ++ -- += -= *= /= %= == != <= >= ->"),
            vec![
                AndAnd, OrOr, PlusPlus, MinusMinus, PlusEq, MinusEq, StarEq, SlashEq,
                PercentEq, EqEq, Neq, Lte, Gte, Arrow, Eof
            ]
        );
    }

    #[test]
    fn skips_line_comments() {
        use TokenKind::*;
        assert_eq!(kinds("let x // comment\nlet y"), vec![Let, Ident, Let, Ident, Eof]);
    }

    #[test]
    fn tracks_line_and_column() {
        let toks = Lexer::new("a\nbb").tokenize().unwrap();
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (2, 1));
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(matches!(err, CompileError::Lex { .. }));
    }

    #[test]
    fn string_escape_is_stored_verbatim() {
        let toks = Lexer::new(r#""a\nb""#).tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::String);
        assert_eq!(toks[0].text, r#""a\nb""#);
    }
}
