//! Compiler error types: a plain enum with a hand-written `Display`/`Error`
//! impl, no external error-handling crate.

use std::fmt;
use std::path::PathBuf;

/// A source position used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

/// Top-level compiler error.
#[derive(Debug)]
pub enum CompileError {
    /// Unterminated string literal or unrecognized byte.
    Lex { pos: Pos, message: String },
    /// Unexpected token during parsing.
    Parse { pos: Pos, message: String },
    /// A malformed construct discovered during code generation that the
    /// parser's grammar couldn't rule out up front (an unsupported
    /// field-access chain, a call with too many arguments).
    Codegen { message: String },
    /// Reading the source file or writing the assembly output failed.
    Io { path: PathBuf, source: std::io::Error },
    /// An assembler or linker subprocess failed.
    Tool { tool: String, message: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex { pos, message } => {
                write!(f, "Error at {pos}: {message}")
            }
            CompileError::Parse { pos, message } => {
                write!(f, "Parse error at {pos}: {message}")
            }
            CompileError::Codegen { message } => {
                write!(f, "Code generation error: {message}")
            }
            CompileError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            CompileError::Tool { tool, message } => {
                write!(f, "{tool} failed: {message}")
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl CompileError {
    pub fn lex(pos: Pos, message: impl Into<String>) -> Self {
        CompileError::Lex { pos, message: message.into() }
    }

    pub fn parse(pos: Pos, message: impl Into<String>) -> Self {
        CompileError::Parse { pos, message: message.into() }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        CompileError::Codegen { message: message.into() }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Tool { tool: tool.into(), message: message.into() }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
