//! Structured analysis of a failed code payload.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use taskloom_core::NodeFailure;

/// Broad class of a code failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Parse or indentation error
    Syntax,
    /// Undefined identifier
    Name,
    /// Operation on the wrong type
    Type,
    /// Missing or broken module import
    Import,
    /// Missing attribute
    Attribute,
    /// Missing mapping key
    Key,
    /// Sequence index out of range
    Index,
    /// Right type, wrong value
    Value,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Classify an error kind such as `NameError`.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "SyntaxError" | "IndentationError" | "TabError" => Self::Syntax,
            "NameError" | "UnboundLocalError" => Self::Name,
            "TypeError" => Self::Type,
            "ImportError" | "ModuleNotFoundError" => Self::Import,
            "AttributeError" => Self::Attribute,
            "KeyError" => Self::Key,
            "IndexError" => Self::Index,
            "ValueError" => Self::Value,
            _ => Self::Unknown,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Name => "name",
            Self::Type => "type",
            Self::Import => "import",
            Self::Attribute => "attribute",
            Self::Key => "key",
            Self::Index => "index",
            Self::Value => "value",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    /// Category
    pub category: ErrorCategory,
    /// Error kind as reported
    pub kind: String,
    /// Error message as reported
    pub message: String,
    /// Offending line (1-based)
    pub line: Option<u32>,
    /// Offending column (1-based)
    pub offset: Option<u32>,
    /// Undefined identifier, for name errors
    pub missing_name: Option<String>,
    /// Missing module, for import errors
    pub missing_module: Option<String>,
    /// Source text of the offending line
    pub source_line: Option<String>,
    /// Hint for the fixer
    pub suggestion: String,
}

struct Patterns {
    name: Regex,
    module: Regex,
    line: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        name: Regex::new(r"name '(\w+)' is not defined").unwrap(),
        module: Regex::new(r"No module named '([\w.]+)'").unwrap(),
        line: Regex::new(r"line (\d+)").unwrap(),
    })
}

/// Analyze a failure raised by `code`.
pub fn analyze(code: &str, failure: &NodeFailure) -> ErrorAnalysis {
    let patterns = patterns();
    let category = ErrorCategory::from_kind(&failure.kind);

    let line = failure.line.or_else(|| {
        patterns
            .line
            .captures(&failure.message)
            .and_then(|caps| caps[1].parse().ok())
    });

    let missing_name = (category == ErrorCategory::Name)
        .then(|| patterns.name.captures(&failure.message))
        .flatten()
        .map(|caps| caps[1].to_string());

    let missing_module = (category == ErrorCategory::Import)
        .then(|| patterns.module.captures(&failure.message))
        .flatten()
        .map(|caps| caps[1].to_string());

    let source_line = line
        .and_then(|n| code.lines().nth((n as usize).checked_sub(1)?))
        .map(|l| l.trim_end().to_string());

    let suggestion = match category {
        ErrorCategory::Syntax => match line {
            Some(n) => format!("Fix the syntax error on line {}", n),
            None => "Fix the syntax error".to_string(),
        },
        ErrorCategory::Name => match &missing_name {
            Some(name) => format!("Define '{}' or import it before use", name),
            None => "Define the missing identifier before use".to_string(),
        },
        ErrorCategory::Import => match &missing_module {
            Some(module) => format!(
                "Module '{}' is unavailable; use the standard library or declare it as a dependency",
                module
            ),
            None => "Check the import statement".to_string(),
        },
        ErrorCategory::Type => "Check argument and operand types".to_string(),
        ErrorCategory::Attribute => "Check that the object has the attribute used".to_string(),
        ErrorCategory::Key => "Check the key exists before reading it".to_string(),
        ErrorCategory::Index => "Check sequence bounds before indexing".to_string(),
        ErrorCategory::Value => "Validate input values before use".to_string(),
        ErrorCategory::Unknown => "Inspect the error message".to_string(),
    };

    ErrorAnalysis {
        category,
        kind: failure.kind.clone(),
        message: failure.message.clone(),
        line,
        offset: failure.offset,
        missing_name,
        missing_module,
        source_line,
        suggestion,
    }
}
