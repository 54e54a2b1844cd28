//! Walks a workflow graph, dispatching each node to its executor.

use crate::builtin::{
    CodeExecutor, EndExecutor, HttpExecutor, LoopExecutor, StartExecutor, TransformExecutor,
};
use crate::executor::{ExecutorRegistry, NodeInputs, RunContext};
use crate::runtime::ContainerRuntime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{NodeDefinition, NodeFailure, RunEvent, RunReport, WorkflowGraph};
use taskloom_recovery::{FailureOrchestrator, RecoveryStrategy};
use tracing::{debug, error, info, warn};

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Iteration bound for loop nodes without their own `max_iterations`
    pub max_iterations: u32,
    /// Default timeout of HTTP nodes, in seconds
    pub http_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            http_timeout_secs: 30,
        }
    }
}

impl DispatchConfig {
    /// Set loop bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Final outcome of one node after recovery.
enum Outcome {
    Succeeded(Value),
    Skipped,
    Abort,
    Replan { failure: NodeFailure, attempts: u32 },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Node dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ExecutorRegistry>,
    orchestrator: Arc<FailureOrchestrator>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        registry: ExecutorRegistry,
        orchestrator: FailureOrchestrator,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            orchestrator: Arc::new(orchestrator),
            config,
        }
    }

    /// Registry with every built-in executor. Code and container nodes are
    /// only registered when a runtime is given.
    pub fn builtin_registry(
        config: &DispatchConfig,
        runtime: Option<Arc<dyn ContainerRuntime>>,
    ) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new()
            .with("start", Arc::new(StartExecutor))
            .with("end", Arc::new(EndExecutor))
            .with("transform", Arc::new(TransformExecutor))
            .with("loop", Arc::new(LoopExecutor))
            .with(
                "http",
                Arc::new(HttpExecutor::new(Duration::from_secs(config.http_timeout_secs))),
            );
        if let Some(runtime) = runtime {
            let code = Arc::new(CodeExecutor::new(runtime));
            registry.register("code", code.clone());
            registry.register("container", code);
        }
        registry
    }

    /// Inputs of `node_id`: one entry per upstream node, holding its output or
    /// `None` when it failed or was skipped.
    pub fn gather_inputs(graph: &WorkflowGraph, report: &RunReport, node_id: &str) -> NodeInputs {
        graph
            .upstream(node_id)
            .into_iter()
            .map(|up| (up.to_string(), report.output(up).cloned()))
            .collect()
    }

    /// Run a whole graph. Failures are recovered or recorded; the walk only
    /// stops early on an abort decision.
    pub async fn run(&self, graph: &WorkflowGraph, ctx: &RunContext) -> RunReport {
        let mut report = RunReport::new(ctx.run_id);
        let mut graph = graph.clone();
        let mut replans = 0u32;

        info!(run_id = %ctx.run_id, nodes = graph.len(), "Starting run");
        report.log(RunEvent::new("run_started", format!("{} nodes", graph.len())));

        loop {
            let next = graph
                .topological_order()
                .into_iter()
                .find(|id| !report.nodes.contains_key(*id))
                .map(str::to_string);
            let Some(node_id) = next else {
                break;
            };
            let Some(node) = graph.node(&node_id).cloned() else {
                break;
            };

            let inputs = Self::gather_inputs(&graph, &report, &node_id);
            match self.dispatch(&node, inputs, ctx, &mut report, replans, false).await {
                Outcome::Succeeded(_) | Outcome::Skipped => {}
                Outcome::Abort => {
                    self.abort(&graph, &mut report, &node_id);
                    break;
                }
                Outcome::Replan { failure, attempts } => {
                    let context = json!({
                        "inputs": ctx.inputs,
                        "outputs": collect_outputs(&report),
                    });
                    match self
                        .orchestrator
                        .replan(&graph, &node_id, &failure, context)
                        .await
                    {
                        Ok(replanned) => {
                            replans += 1;
                            report.forget(&node_id);
                            report.log(RunEvent::for_node(
                                &node_id,
                                "replanned",
                                format!("replaced by {} nodes", replanned.len() + 1 - graph.len()),
                            ));
                            graph = replanned;
                        }
                        Err(e) => {
                            warn!(node_id = %node_id, "Replan failed: {}", e);
                            report.log(RunEvent::for_node(&node_id, "replan_failed", e.to_string()));
                            if self.orchestrator.config().on_exhausted == RecoveryStrategy::Abort {
                                report.record_failure(&node_id, failure, attempts);
                                self.abort(&graph, &mut report, &node_id);
                                break;
                            }
                            report.record_skipped(&node_id, failure, attempts);
                        }
                    }
                }
            }
        }

        report.finish();
        info!(
            run_id = %ctx.run_id,
            status = ?report.status,
            errors = report.errors.len(),
            "Run finished"
        );
        report.log(RunEvent::new(
            "run_finished",
            format!("status={:?} errors={}", report.status, report.errors.len()),
        ));
        report
    }

    fn abort(&self, graph: &WorkflowGraph, report: &mut RunReport, at: &str) {
        error!(node_id = at, "Run aborted");
        report.aborted = true;
        for id in graph.topological_order() {
            report.record_not_run(id);
        }
        report.log(RunEvent::for_node(at, "run_aborted", "abort decision"));
    }

    /// Dispatch one node (group, loop or plain) with recovery.
    fn dispatch<'a>(
        &'a self,
        node: &'a NodeDefinition,
        inputs: NodeInputs,
        ctx: &'a RunContext,
        report: &'a mut RunReport,
        replans: u32,
        in_group: bool,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if node.is_group() {
                return self.dispatch_group(node, inputs, ctx, report, replans).await;
            }

            let mut current = node.clone();
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                debug!(node_id = %node.id, attempt = attempts, "Dispatching node");
                report.log(RunEvent::for_node(
                    &node.id,
                    "node_started",
                    format!("attempt {}", attempts),
                ));

                let failure = match self.invoke(&current, &inputs, ctx).await {
                    Ok(output) => {
                        report.record_success(&node.id, output.clone(), attempts);
                        report.log(RunEvent::for_node(&node.id, "node_succeeded", ""));
                        return Outcome::Succeeded(output);
                    }
                    Err(failure) => failure,
                };

                warn!(node_id = %node.id, attempt = attempts, "Node failed: {}", failure);
                report.log(RunEvent::for_node(&node.id, "node_failed", failure.to_string()));

                let mut decision = self
                    .orchestrator
                    .decide(&current, &failure, attempts, replans)
                    .await;
                if in_group && decision.strategy == RecoveryStrategy::Replan {
                    self.orchestrator
                        .fall_back(&mut decision, "child nodes cannot be replanned");
                }
                report.log(decision.event());

                match decision.strategy {
                    RecoveryStrategy::Retry => {
                        if let Some(code) = decision.repaired_code {
                            report.log(RunEvent::for_node(&node.id, "node_repaired", ""));
                            current.code = Some(code);
                        }
                    }
                    RecoveryStrategy::Skip => {
                        report.record_skipped(&node.id, failure, attempts);
                        return Outcome::Skipped;
                    }
                    RecoveryStrategy::Abort => {
                        report.record_failure(&node.id, failure, attempts);
                        return Outcome::Abort;
                    }
                    RecoveryStrategy::Replan => {
                        return Outcome::Replan { failure, attempts };
                    }
                }
            }
        })
    }

    /// Children run in order. Each sees the group's inputs plus the outputs of
    /// the siblings before it. The group's output maps child ids to outputs.
    async fn dispatch_group(
        &self,
        node: &NodeDefinition,
        inputs: NodeInputs,
        ctx: &RunContext,
        report: &mut RunReport,
        replans: u32,
    ) -> Outcome {
        debug!(node_id = %node.id, children = node.children.len(), "Dispatching group");
        let mut child_inputs = inputs;
        let mut outputs = Map::new();

        for child in &node.children {
            let outcome = self
                .dispatch(child, child_inputs.clone(), ctx, report, replans, true)
                .await;
            let output = match outcome {
                Outcome::Succeeded(output) => Some(output),
                Outcome::Skipped => None,
                Outcome::Replan { failure, attempts } => {
                    report.record_skipped(&child.id, failure, attempts);
                    None
                }
                Outcome::Abort => return Outcome::Abort,
            };
            outputs.insert(child.id.clone(), output.clone().unwrap_or(Value::Null));
            child_inputs.insert(child.id.clone(), output);
        }

        let output = Value::Object(outputs);
        report.record_success(&node.id, output.clone(), 1);
        Outcome::Succeeded(output)
    }

    /// Run the node's executor once (or, for a loop, once per iteration).
    async fn invoke(
        &self,
        node: &NodeDefinition,
        inputs: &NodeInputs,
        ctx: &RunContext,
    ) -> Result<Value, NodeFailure> {
        let executor = self.registry.get(node.node_type.as_str()).ok_or_else(|| {
            NodeFailure::new(
                "UnsupportedNode",
                format!("no executor registered for type '{}'", node.node_type),
            )
        })?;

        if !node.is_loop() {
            return executor.execute(node, inputs, ctx).await;
        }

        let bound = node
            .config_u64("max_iterations")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(self.config.max_iterations)
            .max(1);

        let mut output = Value::Null;
        for iteration in 0..bound {
            output = executor.execute(node, inputs, &ctx.at_iteration(iteration)).await?;
            if output.get("continue") != Some(&Value::Bool(true)) {
                return Ok(output);
            }
        }
        warn!(node_id = %node.id, bound, "Loop stopped at iteration bound");
        Ok(output)
    }
}

fn collect_outputs(report: &RunReport) -> Value {
    Value::Object(
        report
            .nodes
            .iter()
            .filter_map(|(id, entry)| entry.output.clone().map(|output| (id.clone(), output)))
            .collect(),
    )
}
