//! Disallow-list validation of code payloads.

use crate::lexer::{tokenize, LogicalLine, Token, TokenKind};
use crate::syntax::check_syntax;
use crate::SyntaxIssue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const DEFAULT_MODULES: &[&str] = &[
    "os", "sys", "subprocess", "socket", "shutil", "ctypes", "cffi", "multiprocessing", "pty",
    "signal", "importlib", "builtins", "pickle", "marshal", "posix", "nt", "resource", "mmap",
    "fcntl", "urllib", "urllib2", "urllib3", "http", "httplib", "ftplib", "telnetlib", "smtplib",
    "requests", "paramiko",
];

const DEFAULT_BUILTINS: &[&str] = &[
    "eval", "exec", "execfile", "compile", "open", "input", "raw_input", "__import__",
    "breakpoint",
];

const DEFAULT_COMMAND_PATTERN: &str =
    r"^(system|popen\d?|spawn\w*|exec\w*|call|run|check_call|check_output|getoutput|getstatusoutput|Popen|startfile|fork\w*|kill\w*)$";

/// Errors building a validator.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    /// The command pattern does not compile
    #[error("Invalid command pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// The disallow-lists a validator enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Modules that may not be imported
    pub disallowed_modules: BTreeSet<String>,

    /// Built-ins that may not be called
    pub disallowed_builtins: BTreeSet<String>,

    /// Method names that count as command execution on a disallowed module
    pub command_pattern: String,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            disallowed_modules: DEFAULT_MODULES.iter().map(|s| s.to_string()).collect(),
            disallowed_builtins: DEFAULT_BUILTINS.iter().map(|s| s.to_string()).collect(),
            command_pattern: DEFAULT_COMMAND_PATTERN.to_string(),
        }
    }
}

/// Kind of a safety violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// `import x` / `from x import y` of a disallowed module
    DisallowedImport,
    /// Call to a disallowed built-in
    DisallowedCall,
    /// Command-execution call on a disallowed module
    CommandExecution,
    /// The payload could not be tokenized, so it cannot be cleared
    Unparseable,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Kind
    pub kind: ViolationKind,
    /// Offending module, built-in or call path
    pub name: String,
    /// Line (1-based)
    pub line: u32,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ViolationKind::DisallowedImport => {
                write!(f, "line {}: import of disallowed module '{}'", self.line, self.name)
            }
            ViolationKind::DisallowedCall => {
                write!(f, "line {}: call to disallowed built-in '{}'", self.line, self.name)
            }
            ViolationKind::CommandExecution => {
                write!(f, "line {}: command execution via '{}'", self.line, self.name)
            }
            ViolationKind::Unparseable => write!(f, "line {}: {}", self.line, self.name),
        }
    }
}

/// Result of validating one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// Findings in source order
    pub violations: Vec<Violation>,
}

impl SafetyReport {
    /// Whether no violation was found.
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }
}

impl std::fmt::Display for SafetyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Why a candidate payload was not accepted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Rejection {
    /// Structurally invalid
    #[error("syntax error at line {}: {}", .0.line, .0.message)]
    Syntax(SyntaxIssue),

    /// Violates the disallow-lists
    #[error("unsafe code: {0}")]
    Unsafe(SafetyReport),
}

/// Static safety validator for Python payloads.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    policy: SafetyPolicy,
    command: Regex,
}

impl SafetyValidator {
    /// Create a validator for a policy.
    pub fn new(policy: SafetyPolicy) -> Result<Self, SafetyError> {
        let command = Regex::new(&policy.command_pattern)?;
        Ok(Self { policy, command })
    }

    /// The enforced policy.
    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Run the structural syntax check.
    pub fn check_syntax(&self, code: &str) -> Result<(), SyntaxIssue> {
        check_syntax(code)
    }

    /// List every disallow-list violation in `code`.
    pub fn validate(&self, code: &str) -> SafetyReport {
        let lines = match tokenize(code) {
            Ok(lines) => lines,
            Err(issue) => {
                return SafetyReport {
                    violations: vec![Violation {
                        kind: ViolationKind::Unparseable,
                        name: issue.message,
                        line: issue.line,
                    }],
                }
            }
        };

        let mut violations = Vec::new();
        let bindings = self.collect_imports(&lines, &mut violations);
        for line in &lines {
            self.check_calls(&line.tokens, &bindings, &mut violations);
        }
        violations.sort_by_key(|v| v.line);

        if !violations.is_empty() {
            debug!(count = violations.len(), "Payload rejected by safety validator");
        }
        SafetyReport { violations }
    }

    /// Convenience predicate over [`validate`](Self::validate).
    pub fn is_safe(&self, code: &str) -> bool {
        self.validate(code).is_safe()
    }

    /// Accept a candidate only if it is both syntactically valid and safe.
    pub fn accept(&self, code: &str) -> Result<(), Rejection> {
        check_syntax(code).map_err(Rejection::Syntax)?;
        let report = self.validate(code);
        if report.is_safe() {
            Ok(())
        } else {
            Err(Rejection::Unsafe(report))
        }
    }

    fn is_disallowed(&self, module: &str) -> bool {
        self.policy.disallowed_modules.contains(module)
    }

    /// Record import violations and return local name -> module root bindings.
    fn collect_imports(
        &self,
        lines: &[LogicalLine],
        violations: &mut Vec<Violation>,
    ) -> Bindings {
        let mut bindings = Bindings::default();

        for line in lines {
            let tokens = &line.tokens;
            match line.first_name() {
                Some("import") => {
                    let mut pos = 1;
                    while let Some((path, next)) = dotted_name(tokens, pos) {
                        let root = path[0].clone();
                        let (local, next) = alias(tokens, next).unwrap_or((root.clone(), next));
                        self.flag_import(&root, line.line, violations);
                        bindings.modules.insert(local, root);
                        if tokens.get(next).is_some_and(|t| t.is_op(",")) {
                            pos = next + 1;
                        } else {
                            break;
                        }
                    }
                }
                Some("from") => {
                    let Some((path, next)) = dotted_name(tokens, 1) else {
                        continue;
                    };
                    let root = path[0].clone();
                    self.flag_import(&root, line.line, violations);

                    if !tokens.get(next).is_some_and(|t| t.is_name("import")) {
                        continue;
                    }
                    let mut pos = next + 1;
                    while let Some(token) = tokens.get(pos) {
                        if token.kind == TokenKind::Name {
                            let (local, next) =
                                alias(tokens, pos + 1).unwrap_or((token.text.clone(), pos + 1));
                            bindings
                                .functions
                                .insert(local, format!("{}.{}", root, token.text));
                            pos = next;
                        } else {
                            pos += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        bindings
    }

    fn flag_import(&self, root: &str, line: u32, violations: &mut Vec<Violation>) {
        if self.is_disallowed(root) {
            violations.push(Violation {
                kind: ViolationKind::DisallowedImport,
                name: root.to_string(),
                line,
            });
        }
    }

    fn check_calls(&self, tokens: &[Token], bindings: &Bindings, violations: &mut Vec<Violation>) {
        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Name || !tokens.get(i + 1).is_some_and(|t| t.is_op("(")) {
                continue;
            }
            let previous = i.checked_sub(1).map(|p| &tokens[p]);

            if previous.is_some_and(|p| p.is_op(".")) {
                let Some(object) = i.checked_sub(2).map(|p| &tokens[p]) else {
                    continue;
                };
                if object.kind != TokenKind::Name {
                    continue;
                }
                let module = bindings
                    .modules
                    .get(&object.text)
                    .cloned()
                    .or_else(|| self.is_disallowed(&object.text).then(|| object.text.clone()));
                if let Some(module) = module {
                    if self.is_disallowed(&module) && self.command.is_match(&token.text) {
                        violations.push(Violation {
                            kind: ViolationKind::CommandExecution,
                            name: format!("{}.{}", object.text, token.text),
                            line: token.line,
                        });
                    }
                }
                continue;
            }

            if previous.is_some_and(|p| p.is_name("def") || p.is_name("class")) {
                continue;
            }

            if self.policy.disallowed_builtins.contains(&token.text) {
                violations.push(Violation {
                    kind: ViolationKind::DisallowedCall,
                    name: token.text.clone(),
                    line: token.line,
                });
            } else if let Some(path) = bindings.functions.get(&token.text) {
                let (module, function) = path.split_once('.').unwrap_or((path.as_str(), ""));
                if self.is_disallowed(module) && self.command.is_match(function) {
                    violations.push(Violation {
                        kind: ViolationKind::CommandExecution,
                        name: path.clone(),
                        line: token.line,
                    });
                }
            }
        }
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self {
            policy: SafetyPolicy::default(),
            command: Regex::new(DEFAULT_COMMAND_PATTERN).expect("default command pattern is valid"),
        }
    }
}

#[derive(Debug, Default)]
struct Bindings {
    /// local name -> module root, from `import x [as y]`
    modules: HashMap<String, String>,
    /// local name -> `module.function`, from `from x import f [as g]`
    functions: HashMap<String, String>,
}

/// Parse `a.b.c` starting at `pos`. Returns the components and the next index.
fn dotted_name(tokens: &[Token], pos: usize) -> Option<(Vec<String>, usize)> {
    let first = tokens.get(pos).filter(|t| t.kind == TokenKind::Name)?;
    let mut parts = vec![first.text.clone()];
    let mut next = pos + 1;
    while tokens.get(next).is_some_and(|t| t.is_op("."))
        && tokens.get(next + 1).is_some_and(|t| t.kind == TokenKind::Name)
    {
        parts.push(tokens[next + 1].text.clone());
        next += 2;
    }
    Some((parts, next))
}

/// Parse `as name` at `pos`.
fn alias(tokens: &[Token], pos: usize) -> Option<(String, usize)> {
    if !tokens.get(pos)?.is_name("as") {
        return None;
    }
    let name = tokens.get(pos + 1).filter(|t| t.kind == TokenKind::Name)?;
    Some((name.text.clone(), pos + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(report: &SafetyReport) -> Vec<ViolationKind> {
        report.violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_os_system_rejected() {
        let validator = SafetyValidator::default();
        let report = validator.validate("import os\nos.system('rm -rf /')\n");

        assert!(!report.is_safe());
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::DisallowedImport, ViolationKind::CommandExecution]
        );
        assert_eq!(report.violations[1].name, "os.system");
        assert_eq!(report.violations[1].line, 2);
    }

    #[test]
    fn test_math_only_passes() {
        let validator = SafetyValidator::default();
        assert!(validator.is_safe("import math\nprint(math.sqrt(16))\n"));
        assert!(validator.accept("import math\nprint(math.sqrt(16))\n").is_ok());
    }

    #[test]
    fn test_alias_and_from_imports() {
        let validator = SafetyValidator::default();

        let report = validator.validate("import subprocess as sp\nsp.run(['ls'])\n");
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::DisallowedImport, ViolationKind::CommandExecution]
        );
        assert_eq!(report.violations[1].name, "sp.run");

        let report = validator.validate("from os import system as s\ns('ls')\n");
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::DisallowedImport, ViolationKind::CommandExecution]
        );
        assert_eq!(report.violations[1].name, "os.system");
    }

    #[test]
    fn test_dotted_import_uses_root() {
        let validator = SafetyValidator::default();
        let report = validator.validate("import os.path, json\n");
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].name, "os");
    }

    #[test]
    fn test_builtin_calls() {
        let validator = SafetyValidator::default();
        let report = validator.validate("x = eval('1+1')\nopen('/etc/passwd')\n");
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::DisallowedCall, ViolationKind::DisallowedCall]
        );

        // Methods and definitions that share a name are fine.
        assert!(validator.is_safe("model.eval()\ndef open(x):\n    return x\n"));
    }

    #[test]
    fn test_strings_and_comments_ignored() {
        let validator = SafetyValidator::default();
        assert!(validator.is_safe("doc = 'import os; os.system(1)'\n# eval(x)\n"));
    }

    #[test]
    fn test_relative_import_ignored() {
        let validator = SafetyValidator::default();
        assert!(validator.is_safe("from . import helpers\nhelpers.run()\n"));
    }

    #[test]
    fn test_unparseable_is_rejected() {
        let validator = SafetyValidator::default();
        let report = validator.validate("x = 'open\n");
        assert_eq!(kinds(&report), vec![ViolationKind::Unparseable]);
    }

    #[test]
    fn test_accept_reports_syntax_first() {
        let validator = SafetyValidator::default();
        assert!(matches!(
            validator.accept("import os\ndef f(:\n"),
            Err(Rejection::Syntax(_))
        ));
        assert!(matches!(
            validator.accept("import socket\n"),
            Err(Rejection::Unsafe(_))
        ));
    }

    #[test]
    fn test_custom_policy() {
        let policy = SafetyPolicy {
            disallowed_modules: ["numpy".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let validator = SafetyValidator::new(policy).unwrap();
        assert!(!validator.is_safe("import numpy\n"));
        assert!(validator.is_safe("import os\n"));
    }

    #[test]
    fn test_invalid_pattern() {
        let policy = SafetyPolicy {
            command_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(SafetyValidator::new(policy).is_err());
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: SafetyPolicy =
            serde_json::from_str(r#"{"disallowed_builtins": ["eval"]}"#).unwrap();
        assert_eq!(policy.disallowed_builtins.len(), 1);
        assert!(policy.disallowed_modules.contains("subprocess"));
    }
}
