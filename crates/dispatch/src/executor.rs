//! Typed executor interface and the registry that resolves type tags.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use taskloom_core::{NodeDefinition, NodeFailure, RunId};

/// Inputs of a node, keyed by upstream node id. `None` marks an upstream
/// that failed or was skipped.
pub type NodeInputs = BTreeMap<String, Option<Value>>;

/// Run-wide context handed to every executor.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run identifier
    pub run_id: RunId,
    /// Caller-supplied run inputs
    pub inputs: Value,
    /// Free-form run variables
    pub variables: Map<String, Value>,
    /// Current iteration, inside a loop node
    pub iteration: u32,
}

impl RunContext {
    /// Create a context for a new run.
    pub fn new(inputs: Value) -> Self {
        Self {
            run_id: RunId::new(),
            inputs,
            variables: Map::new(),
            iteration: 0,
        }
    }

    /// Set run id.
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Set one variable.
    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub(crate) fn at_iteration(&self, iteration: u32) -> Self {
        Self {
            iteration,
            ..self.clone()
        }
    }
}

/// Executes one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute `node` with its gathered inputs.
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeInputs,
        ctx: &RunContext,
    ) -> Result<Value, NodeFailure>;
}

/// Maps type tags to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a type tag, replacing any previous one.
    pub fn register(&mut self, node_type: &str, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type.to_string(), executor);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, node_type: &str, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(node_type, executor);
        self
    }

    /// Look up the executor for a type tag.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
