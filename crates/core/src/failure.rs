//! Typed failure returned by node executors.

use serde::{Deserialize, Serialize};

/// Error kind reported for code rejected by the safety validator.
pub const SAFETY_VIOLATION: &str = "SafetyViolation";

/// A node-level failure.
///
/// `kind` carries the error class reported by the executor or runtime
/// (`NameError`, `SyntaxError`, `TimeoutError`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NodeFailure {
    /// Error class
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Offending line (1-based), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Offending column (1-based), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl NodeFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            line: None,
            offset: None,
        }
    }

    /// A syntax failure at a known position.
    pub fn syntax(message: impl Into<String>, line: u32, offset: u32) -> Self {
        Self {
            line: Some(line),
            offset: Some(offset),
            ..Self::new("SyntaxError", message)
        }
    }

    /// A payload rejected by the safety validator.
    pub fn safety(message: impl Into<String>) -> Self {
        Self::new(SAFETY_VIOLATION, message)
    }

    /// Whether this failure came from the safety validator.
    pub fn is_safety_violation(&self) -> bool {
        self.kind == SAFETY_VIOLATION
    }
}

impl From<anyhow::Error> for NodeFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new("Error", format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let failure = NodeFailure::new("NameError", "name 'x' is not defined");
        assert_eq!(failure.to_string(), "NameError: name 'x' is not defined");
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("calling upstream");
        let failure = NodeFailure::from(err);
        assert_eq!(failure.kind, "Error");
        assert!(failure.message.contains("calling upstream"));
        assert!(failure.message.contains("connection refused"));
    }

    #[test]
    fn test_safety_kind() {
        assert!(NodeFailure::safety("import of os").is_safety_violation());
        assert!(!NodeFailure::syntax("bad", 1, 2).is_safety_violation());
    }
}
