//! Dependency resolution against the task archive.

use std::collections::HashMap;
use taskloom_core::{Task, TaskId, TaskStatus};

/// Whether a task may run yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every dependency completed
    Ready,
    /// Waiting on these dependencies
    Blocked(Vec<TaskId>),
    /// A dependency failed or was cancelled, so the task can never run
    Failed(TaskId),
}

/// Resolve `dependencies` against archived tasks. Anything not archived yet
/// is still in flight or queued.
pub fn resolve(dependencies: &[TaskId], archive: &HashMap<TaskId, Task>) -> Resolution {
    let mut blocked = Vec::new();

    for dep in dependencies {
        match archive.get(dep).map(|t| t.status) {
            Some(TaskStatus::Completed) => {}
            Some(TaskStatus::Failed) | Some(TaskStatus::Cancelled) => {
                return Resolution::Failed(*dep);
            }
            _ => blocked.push(*dep),
        }
    }

    if blocked.is_empty() {
        Resolution::Ready
    } else {
        Resolution::Blocked(blocked)
    }
}
