//! Dependency-aware, priority-ordered task scheduling with admission control.

use crate::dependency::{resolve, Resolution};
use crate::locks::{LockGuard, LockTable};
use crate::selector::{PendingQueue, Queued};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{Task, TaskId, TaskStatus, MAX_PRIORITY, MIN_PRIORITY};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Errors returned by the scheduler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    /// No task with that id was ever submitted
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The wait elapsed before the task finished
    #[error("Timed out waiting for task")]
    Timeout,

    /// The task finished with an error
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The task was cancelled
    #[error("Task cancelled")]
    Cancelled,

    /// Priority outside the accepted range
    #[error("Invalid priority {0}: must be between 1 and 10")]
    InvalidPriority(u8),

    /// A dependency id the scheduler has never seen
    #[error("Unknown dependency: {0}")]
    UnknownDependency(TaskId),
}

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max tasks in flight
    pub max_concurrent: NonZeroUsize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl SchedulerConfig {
    /// Set max concurrent tasks.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }
}

/// Arguments passed to an executable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments
    pub positional: Vec<Value>,
    /// Keyword arguments
    pub keyword: Map<String, Value>,
}

impl TaskArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.keyword.insert(key.into(), value);
        self
    }
}

/// Work a task runs.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Run with the task's arguments.
    async fn call(&self, args: TaskArgs) -> anyhow::Result<Value>;
}

struct FnExecutable<F>(F);

#[async_trait]
impl<F, Fut> Executable for FnExecutable<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: TaskArgs) -> anyhow::Result<Value> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as an [`Executable`].
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Executable>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnExecutable(f))
}

struct Entry {
    task: Task,
    executable: Arc<dyn Executable>,
    args: TaskArgs,
    seq: u64,
}

impl Queued for Entry {
    fn task(&self) -> &Task {
        &self.task
    }

    fn seq(&self) -> u64 {
        self.seq
    }
}

struct State {
    pending: PendingQueue<Entry>,
    running: HashMap<TaskId, Task>,
    archive: HashMap<TaskId, Task>,
    /// Futures still executing, including ones whose task was cancelled
    in_flight: usize,
    next_seq: u64,
}

impl State {
    fn lookup(&self, id: &TaskId) -> Option<&Task> {
        self.running
            .get(id)
            .or_else(|| self.archive.get(id))
            .or_else(|| self.pending.get(id).map(|e| &e.task))
    }

    fn knows(&self, id: &TaskId) -> bool {
        self.lookup(id).is_some()
    }

    fn retire(&mut self, task: Task) {
        self.archive.insert(task.id, task);
    }

    /// Fail every queued task that depends, directly or not, on a failed or
    /// cancelled task.
    fn cascade_failures(&mut self) {
        while let Some((mut entry, dep)) = self.pending.take_doomed(&self.archive) {
            warn!(task_id = %entry.task.id, dependency = %dep, "Dependency failed, failing task");
            entry.task.fail(format!("dependency {} failed", dep));
            self.retire(entry.task);
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<State>,
    locks: Arc<LockTable>,
    generation: watch::Sender<u64>,
}

/// Task scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    pending: PendingQueue::new(),
                    running: HashMap::new(),
                    archive: HashMap::new(),
                    in_flight: 0,
                    next_seq: 0,
                }),
                locks: Arc::new(LockTable::new()),
                generation,
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Submit a task.
    ///
    /// It runs at once when a slot is free and every dependency completed;
    /// otherwise it is queued.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        executable: Arc<dyn Executable>,
        args: TaskArgs,
        priority: u8,
        dependencies: Vec<TaskId>,
    ) -> Result<TaskId, SchedulerError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SchedulerError::InvalidPriority(priority));
        }

        let mut state = self.inner.state.lock().await;
        if let Some(unknown) = dependencies.iter().find(|d| !state.knows(d)) {
            return Err(SchedulerError::UnknownDependency(*unknown));
        }

        let mut task = Task::new(name, priority, dependencies);
        let id = task.id;
        let seq = state.next_seq;
        state.next_seq += 1;

        match resolve(&task.dependencies, &state.archive) {
            Resolution::Failed(dep) => {
                warn!(task_id = %id, dependency = %dep, "Submitted with a failed dependency");
                task.fail(format!("dependency {} failed", dep));
                state.retire(task);
                drop(state);
                self.notify();
                return Ok(id);
            }
            Resolution::Ready if state.in_flight < self.inner.config.max_concurrent.get() => {
                info!(task_id = %id, name = %task.name, priority, "Task admitted");
                self.start(
                    &mut state,
                    Entry {
                        task,
                        executable,
                        args,
                        seq,
                    },
                );
            }
            _ => {
                info!(task_id = %id, name = %task.name, priority, "Task queued");
                task.status = TaskStatus::Queued;
                state.pending.push(Entry {
                    task,
                    executable,
                    args,
                    seq,
                });
            }
        }

        Ok(id)
    }

    fn start(&self, state: &mut State, entry: Entry) {
        let Entry {
            mut task,
            executable,
            args,
            ..
        } = entry;
        task.start();
        let id = task.id;
        state.running.insert(id, task);
        state.in_flight += 1;

        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(async move { executable.call(args).await }).await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(join) if join.is_panic() => Err(panic_message(join.into_panic())),
                Err(join) => Err(join.to_string()),
            };
            scheduler.finish(id, result).await;
        });
    }

    async fn finish(&self, id: TaskId, result: Result<Value, String>) {
        let mut state = self.inner.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);

        match state.running.remove(&id) {
            Some(mut task) => {
                match result {
                    Ok(value) => {
                        info!(task_id = %id, "Task completed");
                        task.complete(value);
                    }
                    Err(message) => {
                        error!(task_id = %id, "Task failed: {}", message);
                        task.fail(message);
                    }
                }
                state.retire(task);
                state.cascade_failures();
            }
            None => debug!(task_id = %id, "Discarding outcome of cancelled task"),
        }

        self.promote(&mut state);
        drop(state);
        self.notify();
    }

    /// Fill free slots with the highest-ranked ready tasks.
    fn promote(&self, state: &mut State) {
        while state.in_flight < self.inner.config.max_concurrent.get() {
            let Some(entry) = state.pending.take_ready(&state.archive) else {
                break;
            };
            debug!(task_id = %entry.task.id, "Promoting queued task");
            self.start(state, entry);
        }
    }

    fn notify(&self) {
        self.inner.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Current status of a task.
    pub async fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.state.lock().await.lookup(&id).map(|t| t.status)
    }

    /// Snapshot of a task.
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().await.lookup(&id).cloned()
    }

    /// Wait up to `timeout` for a task's result.
    pub async fn result(&self, id: TaskId, timeout: Duration) -> Result<Value, SchedulerError> {
        let mut changes = self.inner.generation.subscribe();

        let wait = async {
            loop {
                {
                    let state = self.inner.state.lock().await;
                    let task = state.lookup(&id).ok_or(SchedulerError::NotFound(id))?;
                    match task.status {
                        TaskStatus::Completed => {
                            return Ok(task.result.clone().unwrap_or(Value::Null));
                        }
                        TaskStatus::Failed => {
                            return Err(SchedulerError::TaskFailed(
                                task.error.clone().unwrap_or_default(),
                            ));
                        }
                        TaskStatus::Cancelled => return Err(SchedulerError::Cancelled),
                        _ => {}
                    }
                }
                if changes.changed().await.is_err() {
                    return Err(SchedulerError::NotFound(id));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SchedulerError::Timeout)?
    }

    /// Cancel a queued or running task.
    ///
    /// A running task's future is not interrupted: it keeps its slot until
    /// it returns and its outcome is discarded. Returns `false` for terminal
    /// or unknown tasks.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.inner.state.lock().await;

        let task = match state.pending.remove(&id) {
            Some(entry) => Some(entry.task),
            None => state.running.remove(&id),
        };
        let Some(mut task) = task else {
            return false;
        };

        info!(task_id = %id, "Task cancelled");
        task.cancel();
        state.retire(task);
        state.cascade_failures();
        self.promote(&mut state);
        drop(state);
        self.notify();
        true
    }

    /// Wait up to `timeout` until nothing is queued or running.
    pub async fn wait_all(&self, timeout: Duration) -> bool {
        let mut changes = self.inner.generation.subscribe();

        let wait = async {
            loop {
                {
                    let state = self.inner.state.lock().await;
                    if state.pending.is_empty() && state.running.is_empty() {
                        return;
                    }
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Tasks currently running.
    pub async fn running_count(&self) -> usize {
        self.inner.state.lock().await.running.len()
    }

    /// Tasks waiting in the queue.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Take the lock for `resource_id` if it is free. Never waits.
    pub fn acquire_lock(&self, resource_id: &str) -> bool {
        self.inner.locks.acquire(resource_id)
    }

    /// Release the lock for `resource_id`.
    pub fn release_lock(&self, resource_id: &str) -> bool {
        self.inner.locks.release(resource_id)
    }

    /// Scoped, non-blocking lock acquisition.
    pub fn try_lock(&self, resource_id: &str) -> Option<LockGuard> {
        self.inner.locks.try_lock(resource_id)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("task panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const WAIT: Duration = Duration::from_secs(5);

    fn scheduler(max: usize) -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default().with_max_concurrent(NonZeroUsize::new(max).unwrap()),
        )
    }

    fn value(v: Value) -> Arc<dyn Executable> {
        from_fn(move |_| {
            let v = v.clone();
            async move { Ok(v) }
        })
    }

    /// Blocks until the notify fires.
    fn gated(gate: Arc<Notify>) -> Arc<dyn Executable> {
        from_fn(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(json!("released"))
            }
        })
    }

    #[tokio::test]
    async fn test_submit_and_result() {
        let s = scheduler(2);
        let sum = from_fn(|args: TaskArgs| async move {
            let total: i64 = args.positional.iter().filter_map(Value::as_i64).sum();
            Ok(json!(total))
        });

        let id = s
            .submit("sum", sum, TaskArgs::new().with_arg(json!(2)).with_arg(json!(3)), 5, vec![])
            .await
            .unwrap();

        assert_eq!(s.result(id, WAIT).await.unwrap(), json!(5));
        assert_eq!(s.status(id).await, Some(TaskStatus::Completed));
        let task = s.task(id).await.unwrap();
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_rejects_bad_priority_and_unknown_dependency() {
        let s = scheduler(1);
        assert_eq!(
            s.submit("x", value(json!(1)), TaskArgs::new(), 0, vec![]).await,
            Err(SchedulerError::InvalidPriority(0))
        );
        assert_eq!(
            s.submit("x", value(json!(1)), TaskArgs::new(), 11, vec![]).await,
            Err(SchedulerError::InvalidPriority(11))
        );

        let ghost = TaskId::new();
        assert_eq!(
            s.submit("x", value(json!(1)), TaskArgs::new(), 5, vec![ghost]).await,
            Err(SchedulerError::UnknownDependency(ghost))
        );
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let s = scheduler(1);
        let ghost = TaskId::new();
        assert_eq!(s.status(ghost).await, None);
        assert_eq!(
            s.result(ghost, WAIT).await,
            Err(SchedulerError::NotFound(ghost))
        );
        assert!(!s.cancel(ghost).await);
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_captured() {
        let s = scheduler(2);
        let failing = from_fn(|_| async { Err(anyhow::anyhow!("disk full")) });
        let panicking = from_fn(|_| async {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });

        let a = s.submit("fail", failing, TaskArgs::new(), 5, vec![]).await.unwrap();
        let b = s.submit("panic", panicking, TaskArgs::new(), 5, vec![]).await.unwrap();

        assert_eq!(
            s.result(a, WAIT).await,
            Err(SchedulerError::TaskFailed("disk full".into()))
        );
        match s.result(b, WAIT).await {
            Err(SchedulerError::TaskFailed(message)) => assert!(message.contains("kaboom")),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(s.status(b).await, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_result_timeout() {
        let s = scheduler(1);
        let gate = Arc::new(Notify::new());
        let id = s
            .submit("slow", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();

        assert_eq!(
            s.result(id, Duration::from_millis(50)).await,
            Err(SchedulerError::Timeout)
        );
        gate.notify_one();
        assert_eq!(s.result(id, WAIT).await.unwrap(), json!("released"));
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let s = scheduler(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = {
            let active = active.clone();
            let peak = peak.clone();
            from_fn(move |_| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
        };

        for i in 0..6 {
            s.submit(format!("t{}", i), work.clone(), TaskArgs::new(), 5, vec![])
                .await
                .unwrap();
            assert!(s.running_count().await <= 2);
        }

        assert!(s.wait_all(WAIT).await);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(s.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_priority_order_when_slot_frees() {
        let s = scheduler(1);
        let gate = Arc::new(Notify::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let record = |name: &'static str| {
            let order = order.clone();
            from_fn(move |_| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(name);
                    Ok(Value::Null)
                }
            })
        };

        s.submit("blocker", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();
        s.submit("low", record("low"), TaskArgs::new(), 2, vec![]).await.unwrap();
        s.submit("high", record("high"), TaskArgs::new(), 9, vec![]).await.unwrap();
        s.submit("mid-1", record("mid-1"), TaskArgs::new(), 5, vec![]).await.unwrap();
        s.submit("mid-2", record("mid-2"), TaskArgs::new(), 5, vec![]).await.unwrap();
        assert_eq!(s.pending_count().await, 4);

        gate.notify_one();
        assert!(s.wait_all(WAIT).await);
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid-1", "mid-2", "low"]);
    }

    #[tokio::test]
    async fn test_dependency_runs_after_completion() {
        let s = scheduler(4);
        let gate = Arc::new(Notify::new());

        let first = s
            .submit("first", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();
        let second = s
            .submit("second", value(json!(2)), TaskArgs::new(), 9, vec![first])
            .await
            .unwrap();

        // Free capacity, but the dependency is still running.
        assert_eq!(s.status(second).await, Some(TaskStatus::Queued));

        gate.notify_one();
        assert_eq!(s.result(second, WAIT).await.unwrap(), json!(2));
        let first_done = s.task(first).await.unwrap().completed_at.unwrap();
        let second_started = s.task(second).await.unwrap().started_at.unwrap();
        assert!(second_started >= first_done);
    }

    #[tokio::test]
    async fn test_dependency_failure_cascades() {
        let s = scheduler(4);
        let gate = Arc::new(Notify::new());
        let failing = from_fn(move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Err(anyhow::anyhow!("broken"))
            }
        });

        let root = s.submit("root", failing, TaskArgs::new(), 5, vec![]).await.unwrap();
        let child = s
            .submit("child", value(json!(1)), TaskArgs::new(), 5, vec![root])
            .await
            .unwrap();
        let grandchild = s
            .submit("grandchild", value(json!(1)), TaskArgs::new(), 5, vec![child])
            .await
            .unwrap();

        assert!(s.cancel(root).await);
        assert!(s.wait_all(WAIT).await);

        assert_eq!(s.status(root).await, Some(TaskStatus::Cancelled));
        match s.result(grandchild, WAIT).await {
            Err(SchedulerError::TaskFailed(message)) => {
                assert!(message.contains(&child.to_string()))
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Late submissions against a failed dependency fail at once.
        let late = s
            .submit("late", value(json!(1)), TaskArgs::new(), 5, vec![child])
            .await
            .unwrap();
        assert_eq!(s.status(late).await, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let s = scheduler(1);
        let gate = Arc::new(Notify::new());
        let id = s
            .submit("slow", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();
        let next = s
            .submit("next", value(json!("next")), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();
        assert_eq!(s.running_count().await, 1);

        assert!(s.cancel(id).await);
        assert_eq!(s.running_count().await, 0);
        assert_eq!(s.status(id).await, Some(TaskStatus::Cancelled));
        assert_eq!(s.result(id, WAIT).await, Err(SchedulerError::Cancelled));
        assert!(!s.cancel(id).await);

        // The cancelled future still holds the only slot.
        assert_eq!(s.status(next).await, Some(TaskStatus::Queued));

        gate.notify_one();
        assert_eq!(s.result(next, WAIT).await.unwrap(), json!("next"));
        assert_eq!(s.status(id).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let s = scheduler(1);
        let gate = Arc::new(Notify::new());
        s.submit("blocker", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();
        let queued = s
            .submit("queued", value(json!(1)), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();

        assert!(s.cancel(queued).await);
        assert_eq!(s.pending_count().await, 0);
        gate.notify_one();
        assert!(s.wait_all(WAIT).await);
        assert_eq!(s.status(queued).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_wait_all_timeout() {
        let s = scheduler(1);
        let gate = Arc::new(Notify::new());
        s.submit("blocker", gated(gate.clone()), TaskArgs::new(), 5, vec![])
            .await
            .unwrap();

        assert!(!s.wait_all(Duration::from_millis(50)).await);
        gate.notify_one();
        assert!(s.wait_all(WAIT).await);
    }

    #[tokio::test]
    async fn test_locks() {
        let s = scheduler(1);
        assert!(s.acquire_lock("db"));
        assert!(!s.acquire_lock("db"));
        assert!(s.release_lock("db"));
        assert!(!s.release_lock("db"));

        {
            let _guard = s.try_lock("db").unwrap();
            assert!(s.try_lock("db").is_none());
            assert!(!s.clone().acquire_lock("db"));
        }
        assert!(s.acquire_lock("db"));
    }
}
