//! A full run through the engine: scheduler admission, dispatch, recovery.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{
    Edge, NodeDefinition, NodeFailure, NodeRunStatus, NodeType, RunStatus, WorkflowGraph,
};
use taskloom_dispatch::{NodeExecutor, NodeInputs, RunContext};
use taskloom_execution::{KernelConfig, WorkflowEngine};

/// Fails the first `failures` calls, then passes its inputs through.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl NodeExecutor for Flaky {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        inputs: &NodeInputs,
        _ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(NodeFailure::new("ValueError", "transient"));
        }
        Ok(json!({ "seen": inputs.keys().collect::<Vec<_>>() }))
    }
}

fn chain(middle: NodeType) -> WorkflowGraph {
    WorkflowGraph::new(
        vec![
            NodeDefinition::new("a", NodeType::Start),
            NodeDefinition::new("b", middle),
            NodeDefinition::new("c", NodeType::End),
        ],
        vec![Edge::new("a", "b"), Edge::new("b", "c")],
    )
    .unwrap()
}

fn engine(max_retries: u32, flaky: Arc<Flaky>) -> WorkflowEngine {
    let mut config = KernelConfig::default();
    config.recovery.max_retries = max_retries;
    WorkflowEngine::builder(config)
        .with_executor("flaky", flaky)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let flaky = Arc::new(Flaky::new(1));
    let engine = engine(1, flaky.clone());

    let id = engine
        .submit_run("chain", chain(NodeType::from("flaky")), json!({"x": 1}), 5, vec![])
        .await
        .unwrap();
    let report = engine.run_report(id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.attempts("b"), 2);
    assert_eq!(report.output("b"), Some(&json!({"seen": ["a"]})));
    assert_eq!(report.nodes["c"].status, NodeRunStatus::Succeeded);
    assert!(report.errors.is_empty());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

    let actions: Vec<&str> = report.events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"recovery_decision"));
    assert_eq!(actions.first(), Some(&"run_started"));
    assert_eq!(actions.last(), Some(&"run_finished"));
}

#[tokio::test]
async fn test_exhausted_retries_skip_the_node() {
    let flaky = Arc::new(Flaky::new(5));
    let engine = engine(1, flaky.clone());

    let report = engine
        .run(&chain(NodeType::from("flaky")), json!({}))
        .await;

    assert_eq!(report.nodes["b"].status, NodeRunStatus::Skipped);
    assert_eq!(report.attempts("b"), 2);
    assert_eq!(report.errors.len(), 1);
    // Downstream still runs and sees the skipped upstream as null.
    assert_eq!(report.output("c"), Some(&json!({"b": null})));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
}
