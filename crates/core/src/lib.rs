//! taskloom core data models.
//!
//! This crate defines the workflow graph, the node and task records, and the
//! run report shared by every layer of the execution kernel.

#![warn(missing_docs)]

// Identities
mod id;

// Graph model
mod graph;
mod node;

// Scheduling and results
mod task;
mod failure;
mod event;
mod report;

// Re-exports
pub use id::*;

pub use graph::{Edge, GraphError, GraphSpec, WorkflowGraph};
pub use node::{ContainerConfig, ContainerOverrides, NodeDefinition, NodeType};

pub use task::{Task, TaskStatus, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use failure::{NodeFailure, SAFETY_VIOLATION};
pub use event::RunEvent;
pub use report::{ErrorRecord, NodeReport, NodeRunStatus, RunReport, RunStatus};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
