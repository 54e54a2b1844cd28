//! Recovery strategies and the policies that pick them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskloom_core::{NodeDefinition, NodeFailure};
use taskloom_repair::ErrorCategory;

/// What to do about a failed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    /// Dispatch the node again
    Retry,
    /// Record the failure and continue without the node's output
    Skip,
    /// Stop the run
    Abort,
    /// Ask the planner for a replacement segment
    Replan,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Abort => "abort",
            Self::Replan => "replan",
        })
    }
}

/// Picks a strategy for a failure. Bounds are enforced by the orchestrator,
/// not the policy.
pub trait RecoveryPolicy: Send + Sync {
    /// Choose a strategy for `failure` raised by `node`.
    fn choose(
        &self,
        node: &NodeDefinition,
        failure: &NodeFailure,
        category: ErrorCategory,
    ) -> RecoveryStrategy;
}

/// Same strategy for every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub RecoveryStrategy);

impl RecoveryPolicy for FixedPolicy {
    fn choose(&self, _: &NodeDefinition, _: &NodeFailure, _: ErrorCategory) -> RecoveryStrategy {
        self.0
    }
}

/// Strategy by error category.
///
/// The default table retries everything a fix or a second attempt can
/// plausibly cure, and replans import failures and safety violations, which
/// need a different approach rather than another attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyPolicy {
    /// Category table
    pub table: HashMap<ErrorCategory, RecoveryStrategy>,
    /// Strategy for safety violations
    pub safety_violation: RecoveryStrategy,
    /// Strategy for categories missing from the table
    pub fallback: RecoveryStrategy,
}

impl Default for TaxonomyPolicy {
    fn default() -> Self {
        let table = [
            (ErrorCategory::Syntax, RecoveryStrategy::Retry),
            (ErrorCategory::Name, RecoveryStrategy::Retry),
            (ErrorCategory::Type, RecoveryStrategy::Retry),
            (ErrorCategory::Attribute, RecoveryStrategy::Retry),
            (ErrorCategory::Key, RecoveryStrategy::Retry),
            (ErrorCategory::Index, RecoveryStrategy::Retry),
            (ErrorCategory::Value, RecoveryStrategy::Retry),
            (ErrorCategory::Import, RecoveryStrategy::Replan),
            (ErrorCategory::Unknown, RecoveryStrategy::Retry),
        ]
        .into_iter()
        .collect();

        Self {
            table,
            safety_violation: RecoveryStrategy::Replan,
            fallback: RecoveryStrategy::Skip,
        }
    }
}

impl TaxonomyPolicy {
    /// Override one category.
    pub fn with(mut self, category: ErrorCategory, strategy: RecoveryStrategy) -> Self {
        self.table.insert(category, strategy);
        self
    }
}

impl RecoveryPolicy for TaxonomyPolicy {
    fn choose(
        &self,
        _node: &NodeDefinition,
        failure: &NodeFailure,
        category: ErrorCategory,
    ) -> RecoveryStrategy {
        if failure.is_safety_violation() {
            return self.safety_violation;
        }
        self.table.get(&category).copied().unwrap_or(self.fallback)
    }
}
