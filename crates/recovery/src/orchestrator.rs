//! Failure escalation: retry, skip, abort or replan.

use crate::policy::{RecoveryPolicy, RecoveryStrategy, TaxonomyPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use taskloom_core::{GraphError, NodeDefinition, NodeFailure, RunEvent, WorkflowGraph};
use taskloom_repair::{ErrorCategory, RepairService};
use tracing::{info, warn};

/// Errors from the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Replan requested but no planner is configured
    #[error("No planner configured")]
    NoPlanner,

    /// The planner failed
    #[error("Planner failed: {0}")]
    PlannerFailed(String),

    /// The replacement could not be substituted
    #[error("Invalid replacement graph: {0}")]
    Graph(#[from] GraphError),
}

/// Request sent to the planning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    /// Node that failed
    pub failed_node_id: String,
    /// Why it failed
    pub failure_reason: String,
    /// Outputs and inputs gathered so far
    pub execution_context: Value,
}

/// Planning collaborator that regenerates a failing graph segment.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a partial graph to stand in for the failed node.
    async fn replan(&self, request: ReplanRequest) -> anyhow::Result<WorkflowGraph>;
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Retries per node, on top of the first attempt
    pub max_retries: u32,
    /// Replans per run
    pub max_replans: u32,
    /// Strategy used once the chosen one is exhausted. Only skip or abort.
    pub on_exhausted: RecoveryStrategy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_replans: 1,
            on_exhausted: RecoveryStrategy::Skip,
        }
    }
}

impl RecoveryConfig {
    /// Set retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set replan bound.
    pub fn with_max_replans(mut self, max_replans: u32) -> Self {
        self.max_replans = max_replans;
        self
    }

    /// Set fallback strategy.
    pub fn with_on_exhausted(mut self, strategy: RecoveryStrategy) -> Self {
        self.on_exhausted = strategy;
        self
    }

    fn fallback(&self) -> RecoveryStrategy {
        match self.on_exhausted {
            RecoveryStrategy::Abort => RecoveryStrategy::Abort,
            _ => RecoveryStrategy::Skip,
        }
    }
}

/// A recorded recovery decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryDecision {
    /// Failed node
    pub node_id: String,
    /// Attempts made so far
    pub attempt: u32,
    /// Error category
    pub category: ErrorCategory,
    /// Strategy to apply
    pub strategy: RecoveryStrategy,
    /// Replacement payload for a retry, when the repair service found one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repaired_code: Option<String>,
    /// Why the chosen strategy differs from the policy's, if it does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RecoveryDecision {
    /// Event for the run log.
    pub fn event(&self) -> RunEvent {
        let mut detail = format!(
            "attempt={} category={} strategy={}",
            self.attempt, self.category, self.strategy
        );
        if self.repaired_code.is_some() {
            detail.push_str(" repaired=true");
        }
        if let Some(note) = &self.note {
            detail.push_str(&format!(" note=\"{}\"", note));
        }
        RunEvent::for_node(&self.node_id, "recovery_decision", detail)
    }
}

/// Decides how to recover from node failures.
pub struct FailureOrchestrator {
    policy: Arc<dyn RecoveryPolicy>,
    config: RecoveryConfig,
    repair: Option<Arc<RepairService>>,
    planner: Option<Arc<dyn Planner>>,
}

impl Default for FailureOrchestrator {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl FailureOrchestrator {
    /// Create an orchestrator with the default taxonomy policy.
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            policy: Arc::new(TaxonomyPolicy::default()),
            config,
            repair: None,
            planner: None,
        }
    }

    /// Set policy.
    pub fn with_policy(mut self, policy: Arc<dyn RecoveryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Set repair service used before retrying code-bearing nodes.
    pub fn with_repair(mut self, repair: Arc<RepairService>) -> Self {
        self.repair = Some(repair);
        self
    }

    /// Set planner.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Decide what to do about `failure`.
    ///
    /// `attempts` counts dispatches of this node so far; `replans` counts
    /// replans already made in this run.
    pub async fn decide(
        &self,
        node: &NodeDefinition,
        failure: &NodeFailure,
        attempts: u32,
        replans: u32,
    ) -> RecoveryDecision {
        let category = ErrorCategory::from_kind(&failure.kind);
        let chosen = self.policy.choose(node, failure, category);

        let mut decision = RecoveryDecision {
            node_id: node.id.clone(),
            attempt: attempts,
            category,
            strategy: chosen,
            repaired_code: None,
            note: None,
        };

        match chosen {
            RecoveryStrategy::Retry if failure.is_safety_violation() => {
                self.fall_back(&mut decision, "safety violations are never retried");
            }
            RecoveryStrategy::Retry if attempts.saturating_sub(1) >= self.config.max_retries => {
                self.fall_back(&mut decision, "retry bound exhausted");
            }
            RecoveryStrategy::Retry => {
                if let (Some(repair), Some(code)) = (&self.repair, node.code.as_deref()) {
                    let result = repair.repair_with_result(code, failure, &node.label).await;
                    if result.requires_manual_intervention {
                        let reason = result
                            .error_message
                            .unwrap_or_else(|| "repair needs manual intervention".to_string());
                        self.fall_back(&mut decision, &reason);
                    } else {
                        decision.repaired_code = result.repaired_code;
                    }
                }
            }
            RecoveryStrategy::Replan if self.planner.is_none() => {
                self.fall_back(&mut decision, "no planner configured");
            }
            RecoveryStrategy::Replan if replans >= self.config.max_replans => {
                self.fall_back(&mut decision, "replan bound exhausted");
            }
            RecoveryStrategy::Replan | RecoveryStrategy::Skip | RecoveryStrategy::Abort => {}
        }

        info!(
            node_id = %decision.node_id,
            attempt = decision.attempt,
            category = %decision.category,
            strategy = %decision.strategy,
            "Recovery decision"
        );
        decision
    }

    /// Degrade a decision to the configured fallback.
    pub fn fall_back(&self, decision: &mut RecoveryDecision, reason: &str) {
        decision.strategy = self.config.fallback();
        decision.repaired_code = None;
        decision.note = Some(reason.to_string());
    }

    /// Ask the planner for a replacement of `node_id` and splice it in.
    pub async fn replan(
        &self,
        graph: &WorkflowGraph,
        node_id: &str,
        failure: &NodeFailure,
        execution_context: Value,
    ) -> Result<WorkflowGraph, RecoveryError> {
        let planner = self.planner.as_ref().ok_or(RecoveryError::NoPlanner)?;
        let request = ReplanRequest {
            failed_node_id: node_id.to_string(),
            failure_reason: failure.to_string(),
            execution_context,
        };

        let replacement = planner.replan(request).await.map_err(|e| {
            warn!(node_id, "Planner failed: {:#}", e);
            RecoveryError::PlannerFailed(format!("{:#}", e))
        })?;

        let graph = graph.replace_node(node_id, &replacement)?;
        info!(node_id, nodes = replacement.len(), "Replanned failed node");
        Ok(graph)
    }
}
