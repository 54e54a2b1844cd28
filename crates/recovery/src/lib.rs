//! Taskloom Recovery - failure escalation for workflow runs
//!
//! When a node fails, the [`FailureOrchestrator`] classifies the failure,
//! asks its [`RecoveryPolicy`] for a strategy and enforces the retry and
//! replan bounds. Retries of code-bearing nodes go through the repair service
//! first; replans go through the [`Planner`] port.

#![warn(missing_docs)]

mod orchestrator;
mod policy;

pub use orchestrator::{
    FailureOrchestrator, Planner, RecoveryConfig, RecoveryDecision, RecoveryError, ReplanRequest,
};
pub use policy::{FixedPolicy, RecoveryPolicy, RecoveryStrategy, TaxonomyPolicy};
