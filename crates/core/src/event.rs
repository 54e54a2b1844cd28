//! Run events - the ordered audit log of a workflow run.

use crate::Time;
use serde::{Deserialize, Serialize};

/// Something that happened during a run, at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// When it happened
    pub timestamp: Time,

    /// Node the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// What happened, e.g. `node_started`, `recovery_decision`
    pub action: String,

    /// Details
    pub detail: String,
}

impl RunEvent {
    /// Create a run-level event.
    pub fn new(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            node_id: None,
            action: action.into(),
            detail: detail.into(),
        }
    }

    /// Create an event about one node.
    pub fn for_node(
        node_id: impl Into<String>,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::new(action, detail)
        }
    }
}
