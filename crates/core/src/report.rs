//! Run report - the caller-facing result of a workflow run.

use crate::event::RunEvent;
use crate::failure::NodeFailure;
use crate::id::RunId;
use crate::Time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Still executing
    Running,
    /// Finished with no unrecovered errors
    Completed,
    /// Finished with at least one unrecovered error
    Failed,
}

/// Outcome of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    /// Produced an output
    Succeeded,
    /// Failed and was not recovered
    Failed,
    /// Failed and was skipped; its output is absent
    Skipped,
    /// Never dispatched (run aborted or node replaced)
    NotRun,
}

/// Per-node entry of a run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    /// Outcome
    pub status: NodeRunStatus,

    /// Output, when the node succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Last failure, when the node did not succeed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeFailure>,

    /// Number of dispatch attempts
    pub attempts: u32,
}

/// Structured error record appended for every unrecovered node failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failing node
    pub node_id: String,
    /// The failure
    pub error: NodeFailure,
}

/// Result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,

    /// Aggregate status
    pub status: RunStatus,

    /// Per-node outcomes
    pub nodes: BTreeMap<String, NodeReport>,

    /// Unrecovered errors, in occurrence order
    pub errors: Vec<ErrorRecord>,

    /// Ordered audit log
    pub events: Vec<RunEvent>,

    /// Whether the run was halted by an abort decision
    pub aborted: bool,

    /// Start timestamp
    pub started_at: Time,

    /// Finish timestamp
    pub finished_at: Option<Time>,
}

impl RunReport {
    /// Create an empty report for a run that is starting.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            nodes: BTreeMap::new(),
            errors: Vec::new(),
            events: Vec::new(),
            aborted: false,
            started_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    /// Append an event to the log.
    pub fn log(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    /// Record a successful node.
    pub fn record_success(&mut self, node_id: &str, output: Value, attempts: u32) {
        self.nodes.insert(
            node_id.to_string(),
            NodeReport {
                status: NodeRunStatus::Succeeded,
                output: Some(output),
                error: None,
                attempts,
            },
        );
    }

    /// Record an unrecovered failure and append its error record.
    pub fn record_failure(&mut self, node_id: &str, failure: NodeFailure, attempts: u32) {
        self.record_unsuccessful(node_id, NodeRunStatus::Failed, failure, attempts);
    }

    /// Record a failure that was skipped. Counts as an unrecovered error.
    pub fn record_skipped(&mut self, node_id: &str, failure: NodeFailure, attempts: u32) {
        self.record_unsuccessful(node_id, NodeRunStatus::Skipped, failure, attempts);
    }

    /// Record a node that was never dispatched.
    pub fn record_not_run(&mut self, node_id: &str) {
        self.nodes.entry(node_id.to_string()).or_insert(NodeReport {
            status: NodeRunStatus::NotRun,
            output: None,
            error: None,
            attempts: 0,
        });
    }

    /// Drop the entry of a node that no longer exists (replaced by a replan).
    pub fn forget(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
    }

    fn record_unsuccessful(
        &mut self,
        node_id: &str,
        status: NodeRunStatus,
        failure: NodeFailure,
        attempts: u32,
    ) {
        self.errors.push(ErrorRecord {
            node_id: node_id.to_string(),
            error: failure.clone(),
        });
        self.nodes.insert(
            node_id.to_string(),
            NodeReport {
                status,
                output: None,
                error: Some(failure),
                attempts,
            },
        );
    }

    /// Output of a node, if it succeeded.
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id).and_then(|n| n.output.as_ref())
    }

    /// Attempts recorded for a node (0 when it never ran).
    pub fn attempts(&self, node_id: &str) -> u32 {
        self.nodes.get(node_id).map(|n| n.attempts).unwrap_or(0)
    }

    /// Close the report: `completed` when no errors were recorded.
    pub fn finish(&mut self) {
        self.status = if self.errors.is_empty() && !self.aborted {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(chrono::Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_run_completes() {
        let mut report = RunReport::new(RunId::new());
        report.record_success("a", json!(1), 1);
        report.finish();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.output("a"), Some(&json!(1)));
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_skipped_failure_fails_run() {
        let mut report = RunReport::new(RunId::new());
        report.record_skipped("b", NodeFailure::new("ValueError", "bad"), 2);
        report.finish();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].node_id, "b");
        assert_eq!(report.attempts("b"), 2);
        assert!(report.output("b").is_none());
    }

    #[test]
    fn test_not_run_does_not_overwrite() {
        let mut report = RunReport::new(RunId::new());
        report.record_success("a", json!("x"), 1);
        report.record_not_run("a");
        report.record_not_run("c");

        assert_eq!(report.nodes["a"].status, NodeRunStatus::Succeeded);
        assert_eq!(report.nodes["c"].status, NodeRunStatus::NotRun);
    }

    #[test]
    fn test_report_serializes_status_lowercase() {
        let mut report = RunReport::new(RunId::new());
        report.finish();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], json!("completed"));
    }
}
