//! Taskloom Dispatch - node execution for workflow runs
//!
//! The [`Dispatcher`] walks a graph in topological order, resolves each
//! node's type tag to a [`NodeExecutor`] and hands failures to the failure
//! orchestrator. Code payloads are checked by the safety validator and then
//! delegated to a [`ContainerRuntime`]; they never run in-process.

#![warn(missing_docs)]

mod builtin;
mod dispatcher;
mod executor;
mod runtime;

pub use builtin::{
    CodeExecutor, EndExecutor, HttpExecutor, LoopExecutor, StartExecutor, TransformExecutor,
};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use executor::{ExecutorRegistry, NodeExecutor, NodeInputs, RunContext};
pub use runtime::{parse_failure, parse_output, ContainerRequest, ContainerRuntime, DockerRuntime};
