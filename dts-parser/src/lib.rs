//! A parser for the Device Tree source format.
//!
//! The entry point is [`from_str`], which turns source text into a borrowed parse tree.
//! Parsing stops at the first syntax error, which is reported with its position.

pub mod ast;
mod parser;

use nom::error::{ErrorKind, VerboseError, VerboseErrorKind};

pub use ast::*;
pub use parser::from_str;

use parser::Input;

/// A syntax error, located in the source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{column}: {message}, found `{found}`")]
pub struct Error {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// Byte offset from the start of the source.
    pub offset: usize,
    pub message: String,
    /// The offending source text, up to the end of its line.
    pub found: String,
}

impl Error {
    fn from_verbose(err: VerboseError<Input<'_>>) -> Self {
        // The first entry is the innermost failure, contexts are pushed while unwinding.
        // The innermost context wins, both for the message and the reported position.
        let context = err.errors.iter().find_map(|(span, kind)| match kind {
            VerboseErrorKind::Context(ctx) => Some((span, ctx.to_string())),
            _ => None,
        });

        let (span, message) = match (context, err.errors.first()) {
            (Some(found), _) => found,
            (None, Some((span, kind))) => (span, describe(kind)),
            (None, None) => {
                return Self {
                    line: 1,
                    column: 1,
                    offset: 0,
                    message: "syntax error".into(),
                    found: String::new(),
                }
            }
        };

        let found = match span.fragment().lines().next() {
            Some(line) if !line.trim().is_empty() => line.trim().to_string(),
            _ => "end of input".to_string(),
        };

        Self {
            line: span.location_line(),
            column: span.get_utf8_column(),
            offset: span.location_offset(),
            message,
            found,
        }
    }
}

fn describe(kind: &VerboseErrorKind) -> String {
    match kind {
        VerboseErrorKind::Char(c) => format!("expected '{c}'"),
        VerboseErrorKind::Nom(ErrorKind::Eof) => "unexpected input".to_string(),
        VerboseErrorKind::Nom(kind) => format!("syntax error ({})", kind.description()),
        VerboseErrorKind::Context(ctx) => ctx.to_string(),
    }
}
