//! Taskloom Execution - task scheduling and the assembled workflow engine
//!
//! The [`Scheduler`] admits tasks under a concurrency cap, orders them by
//! priority and dependencies, and hands out non-blocking resource locks.
//! The [`WorkflowEngine`] runs workflow graphs as scheduler tasks.

#![warn(missing_docs)]

mod config;
mod dependency;
mod engine;
mod locks;
mod scheduler;
mod selector;

pub use config::{ConfigError, KernelConfig};
pub use dependency::{resolve, Resolution};
pub use engine::{EngineBuilder, WorkflowEngine};
pub use locks::{LockGuard, LockTable};
pub use scheduler::{
    from_fn, Executable, Scheduler, SchedulerConfig, SchedulerError, TaskArgs,
};
