//! Task model - the scheduler's unit of admission.

use crate::id::TaskId;
use crate::Time;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lowest accepted priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 10;
/// Priority used when the caller has no preference.
pub const DEFAULT_PRIORITY: u8 = 5;

/// A unit of work admitted by the scheduler.
///
/// Once a task reaches a terminal status it is archived and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Display name
    pub name: String,

    /// Priority (1-10, higher runs first)
    pub priority: u8,

    /// Current status
    pub status: TaskStatus,

    /// Tasks that must be completed before this one may run
    pub dependencies: Vec<TaskId>,

    /// Result value, set on completion
    pub result: Option<Value>,

    /// Error message, set on failure or cancellation
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: Time,

    /// When the task started running
    pub started_at: Option<Time>,

    /// When the task reached a terminal status
    pub completed_at: Option<Time>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(name: impl Into<String>, priority: u8, dependencies: Vec<TaskId>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            priority,
            status: TaskStatus::Pending,
            dependencies,
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark as running.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(chrono::Utc::now());
    }

    /// Mark as completed with a result.
    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(chrono::Utc::now());
    }

    /// Mark as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(chrono::Utc::now());
    }

    /// Mark as cancelled.
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.error = Some("Task cancelled".to_string());
        self.completed_at = Some(chrono::Utc::now());
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet admitted
    Pending,
    /// Waiting in the queue for a slot or for dependencies
    Queued,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
