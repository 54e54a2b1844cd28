//! Taskloom Safety - static checks for code payloads
//!
//! Every code payload is checked here before it reaches an execution
//! runtime. Two checks are offered: a structural syntax check, and a
//! disallow-list validation over imports, built-in calls and
//! command-execution calls. Findings inside string literals or comments are
//! never reported.

#![warn(missing_docs)]

mod lexer;
mod syntax;
mod validator;

pub use syntax::check_syntax;
pub use validator::{
    Rejection, SafetyError, SafetyPolicy, SafetyReport, SafetyValidator, Violation,
    ViolationKind,
};

use serde::{Deserialize, Serialize};

/// A structural defect found in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("line {line}, column {offset}: {message}")]
pub struct SyntaxIssue {
    /// Human-readable description
    pub message: String,
    /// Line (1-based)
    pub line: u32,
    /// Column (1-based)
    pub offset: u32,
}

impl SyntaxIssue {
    /// Create a new issue.
    pub fn new(message: impl Into<String>, line: u32, offset: u32) -> Self {
        Self {
            message: message.into(),
            line,
            offset,
        }
    }
}
