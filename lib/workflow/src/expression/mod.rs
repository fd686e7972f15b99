//! Guard and interpolation expressions.
//!
//! Expressions are written as `${{ ... }}` (the wrapper is optional for
//! guards) and support:
//!
//! - Variable paths: `jobs.lint.outputs.has_errors`, `jobs.lint.status`,
//!   `steps.x.outputs.y`, `steps.x.status`, `job.output_dir`, plain names
//! - Comparisons: `==`, `!=`, `<`, `>`, `<=`, `>=`
//! - Logic: `&&`, `||`, `!`, parentheses
//! - Builtins: `success()`, `failure()`, `always()`, `cancelled()`
//! - Quoted strings (`'x'` or `"x"`), numbers, `true`/`false`
//!
//! Text is tokenized by [`lexer`], parsed by [`parser`] into an [`Expr`]
//! tree and evaluated by [`evaluator`] against an [`ExpressionContext`].

pub mod context;
pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use context::ExpressionContext;
pub use evaluator::{evaluate, evaluate_to_string, interpolate};
pub use parser::{Builtin, CompareOp, Expr, parse};

use std::fmt;

/// Errors tokenizing or parsing an expression.
///
/// Positions are byte offsets into the expression text after the
/// `${{ }}` wrapper has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// A character that starts no token.
    UnexpectedChar { ch: char, position: usize },
    /// A quoted string with no closing quote.
    UnterminatedString { position: usize },
    /// A token where it cannot appear.
    UnexpectedToken { token: String, position: usize },
    /// The expression ended early.
    UnexpectedEnd,
    /// A call to a function that is not a builtin.
    UnknownFunction { name: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar { ch, position } => {
                write!(f, "unexpected character '{ch}' at position {position}")
            }
            Self::UnterminatedString { position } => {
                write!(f, "unterminated string starting at position {position}")
            }
            Self::UnexpectedToken { token, position } => {
                write!(f, "unexpected '{token}' at position {position}")
            }
            Self::UnexpectedEnd => write!(f, "unexpected end of expression"),
            Self::UnknownFunction { name } => write!(f, "unknown function '{name}()'"),
        }
    }
}

impl std::error::Error for ExpressionError {}
