//! Pending-queue ordering and selection.

use crate::dependency::{resolve, Resolution};
use std::collections::HashMap;
use taskloom_core::{Task, TaskId};

/// A queued entry: anything ordered by priority and submission sequence.
pub(crate) trait Queued {
    fn task(&self) -> &Task;
    fn seq(&self) -> u64;
}

/// Tasks waiting for a slot or for their dependencies, ordered by priority
/// descending, then submission order. Entries keep their position while
/// their dependencies are unmet.
pub(crate) struct PendingQueue<E> {
    entries: Vec<E>,
}

impl<E: Queued> PendingQueue<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: E) {
        let priority = entry.task().priority;
        let seq = entry.seq();
        let pos = self
            .entries
            .iter()
            .position(|e| {
                let other = e.task().priority;
                other < priority || (other == priority && e.seq() > seq)
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    pub fn get(&self, id: &TaskId) -> Option<&E> {
        self.entries.iter().find(|e| e.task().id == *id)
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<E> {
        let pos = self.entries.iter().position(|e| e.task().id == *id)?;
        Some(self.entries.remove(pos))
    }

    /// Take the highest-ranked entry whose dependencies all completed.
    /// Blocked entries are passed over, not reordered.
    pub fn take_ready(&mut self, archive: &HashMap<TaskId, Task>) -> Option<E> {
        let pos = self
            .entries
            .iter()
            .position(|e| resolve(&e.task().dependencies, archive) == Resolution::Ready)?;
        Some(self.entries.remove(pos))
    }

    /// Take one entry whose dependency failed, with the failed dependency.
    pub fn take_doomed(&mut self, archive: &HashMap<TaskId, Task>) -> Option<(E, TaskId)> {
        let (pos, dep) = self.entries.iter().enumerate().find_map(|(pos, e)| {
            match resolve(&e.task().dependencies, archive) {
                Resolution::Failed(dep) => Some((pos, dep)),
                _ => None,
            }
        })?;
        Some((self.entries.remove(pos), dep))
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.task().id).collect()
    }
}
