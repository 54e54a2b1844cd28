//! The workflow engine - wires every layer of the kernel together.
//!
//! ```text
//! submit_run → Scheduler slot → Dispatcher walk → RunReport
//!                                    │ failure
//!                                    ▼
//!                        FailureOrchestrator → RepairService / Planner
//! ```

use crate::config::KernelConfig;
use crate::scheduler::{Executable, Scheduler, SchedulerError, TaskArgs};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{RunReport, TaskId, WorkflowGraph};
use taskloom_decompose::Decomposer;
use taskloom_dispatch::{
    CodeExecutor, ContainerRuntime, Dispatcher, ExecutorRegistry, NodeExecutor, RunContext,
};
use taskloom_recovery::{FailureOrchestrator, Planner, RecoveryPolicy};
use taskloom_repair::{ModelPort, RepairService};
use taskloom_safety::SafetyValidator;
use tracing::{debug, info};

/// Builds a [`WorkflowEngine`] from a [`KernelConfig`] and the ports.
pub struct EngineBuilder {
    config: KernelConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    model: Option<Arc<dyn ModelPort>>,
    planner: Option<Arc<dyn Planner>>,
    policy: Option<Arc<dyn RecoveryPolicy>>,
    executors: Vec<(String, Arc<dyn NodeExecutor>)>,
}

impl EngineBuilder {
    /// Start from a configuration.
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            runtime: None,
            model: None,
            planner: None,
            policy: None,
            executors: Vec::new(),
        }
    }

    /// Container runtime for code and container nodes.
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Model port used by the repair service.
    pub fn with_model(mut self, model: Arc<dyn ModelPort>) -> Self {
        self.model = Some(model);
        self
    }

    /// Planner used for replanning.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Replace the default recovery policy.
    pub fn with_policy(mut self, policy: Arc<dyn RecoveryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register an executor for a type tag. Overrides built-ins.
    pub fn with_executor(mut self, node_type: &str, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executors.push((node_type.to_string(), executor));
        self
    }

    /// Build the engine. Fails only when the configured safety policy does
    /// not compile.
    pub fn build(self) -> anyhow::Result<WorkflowEngine> {
        let config = self.config;
        let validator = SafetyValidator::new(config.safety.clone())?;

        let repair = RepairService::new(self.model, config.repair.clone())
            .with_validator(validator.clone());

        let mut orchestrator =
            FailureOrchestrator::new(config.recovery.clone()).with_repair(Arc::new(repair));
        if let Some(planner) = self.planner {
            orchestrator = orchestrator.with_planner(planner);
        }
        if let Some(policy) = self.policy {
            orchestrator = orchestrator.with_policy(policy);
        }

        let mut registry: ExecutorRegistry = Dispatcher::builtin_registry(&config.dispatch, None);
        if let Some(runtime) = self.runtime {
            let code = Arc::new(
                CodeExecutor::new(runtime)
                    .with_validator(validator.clone())
                    .with_defaults(config.decomposer.container.clone()),
            );
            registry.register("code", code.clone());
            registry.register("container", code);
        }
        for (node_type, executor) in self.executors {
            registry.register(&node_type, executor);
        }
        debug!(types = ?registry.types(), "Executor registry ready");

        let dispatcher = Dispatcher::new(registry, orchestrator, config.dispatch.clone());

        Ok(WorkflowEngine {
            scheduler: Scheduler::new(config.scheduler),
            decomposer: Decomposer::new(config.decomposer.clone()),
            dispatcher,
            validator,
            config,
        })
    }
}

/// The assembled execution kernel.
#[derive(Clone)]
pub struct WorkflowEngine {
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    decomposer: Decomposer,
    validator: SafetyValidator,
    config: KernelConfig,
}

impl WorkflowEngine {
    /// Start building an engine.
    pub fn builder(config: KernelConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Scheduler runs are admitted through.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Node dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Decomposer configured from the kernel settings.
    pub fn decomposer(&self) -> &Decomposer {
        &self.decomposer
    }

    /// Validator for code payloads.
    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    /// Configuration in use.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Run a graph in the caller's task, bypassing admission control.
    pub async fn run(&self, graph: &WorkflowGraph, inputs: Value) -> RunReport {
        self.dispatcher.run(graph, &RunContext::new(inputs)).await
    }

    /// Submit a graph run as a scheduler task. The task's result is the
    /// serialized [`RunReport`].
    pub async fn submit_run(
        &self,
        name: impl Into<String>,
        graph: WorkflowGraph,
        inputs: Value,
        priority: u8,
        dependencies: Vec<TaskId>,
    ) -> Result<TaskId, SchedulerError> {
        let name = name.into();
        let run = Arc::new(GraphRun {
            dispatcher: self.dispatcher.clone(),
            graph,
            inputs,
        });
        let id = self
            .scheduler
            .submit(name.clone(), run, TaskArgs::new(), priority, dependencies)
            .await?;
        info!(task_id = %id, name = %name, "Run submitted");
        Ok(id)
    }

    /// Wait for a submitted run and decode its report.
    pub async fn run_report(&self, task_id: TaskId, timeout: Duration) -> anyhow::Result<RunReport> {
        let value = self.scheduler.result(task_id, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }
}

struct GraphRun {
    dispatcher: Dispatcher,
    graph: WorkflowGraph,
    inputs: Value,
}

#[async_trait]
impl Executable for GraphRun {
    async fn call(&self, args: TaskArgs) -> anyhow::Result<Value> {
        let mut ctx = RunContext::new(self.inputs.clone());
        for (key, value) in args.keyword {
            ctx = ctx.with_variable(key, value);
        }
        let report = self.dispatcher.run(&self.graph, &ctx).await;
        Ok(serde_json::to_value(report)?)
    }
}
