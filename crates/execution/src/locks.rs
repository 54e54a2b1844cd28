//! Named, non-blocking execution locks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Lock table owned by one scheduler.
///
/// Acquisition never waits: it succeeds or returns `false` at once. Callers
/// that need blocking semantics poll.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `resource_id` if it is free.
    pub fn acquire(&self, resource_id: &str) -> bool {
        let acquired = self.held().insert(resource_id.to_string());
        debug!(resource_id, acquired, "Lock acquire");
        acquired
    }

    /// Release the lock. Returns `false` when it was not held.
    pub fn release(&self, resource_id: &str) -> bool {
        let released = self.held().remove(resource_id);
        debug!(resource_id, released, "Lock release");
        released
    }

    /// Whether `resource_id` is currently held.
    pub fn is_held(&self, resource_id: &str) -> bool {
        self.held().contains(resource_id)
    }

    /// Scoped acquisition. The lock is released when the guard drops, on
    /// every exit path including panics.
    pub fn try_lock(self: &Arc<Self>, resource_id: &str) -> Option<LockGuard> {
        self.acquire(resource_id).then(|| LockGuard {
            table: Arc::clone(self),
            resource_id: resource_id.to_string(),
        })
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    resource_id: String,
}

impl LockGuard {
    /// The locked resource.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table.release(&self.resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exclusive() {
        let table = LockTable::new();
        assert!(table.acquire("db"));
        assert!(!table.acquire("db"));
        assert!(table.acquire("cache"));

        assert!(table.release("db"));
        assert!(!table.release("db"));
        assert!(table.acquire("db"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let table = Arc::new(LockTable::new());
        {
            let guard = table.try_lock("file").unwrap();
            assert_eq!(guard.resource_id(), "file");
            assert!(table.is_held("file"));
            assert!(table.try_lock("file").is_none());
        }
        assert!(!table.is_held("file"));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let table = Arc::new(LockTable::new());
        let inner = Arc::clone(&table);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_lock("file").unwrap();
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(!table.is_held("file"));
    }
}
