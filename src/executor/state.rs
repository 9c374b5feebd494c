//! Task execution state tracking
//!
//! Tracks outstanding workers and their execution states. Every launched
//! task gets an entry with a cancellation token and, once spawned, a join
//! handle, so the executor can enumerate, cancel, and drain workers at
//! shutdown.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::search::CancelToken;

// ─────────────────────────────────────────────────────────────────
// Worker State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of one task's worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Payload accepted, worker not yet running the search
    #[default]
    Launched,
    /// The search is running
    Running,
    /// The search finished and the result was reported
    Finished,
    /// The task failed (decode, provisioning, callback, or kill)
    Failed,
}

// ─────────────────────────────────────────────────────────────────
// Active Task
// ─────────────────────────────────────────────────────────────────

/// One tracked worker
#[derive(Debug)]
pub struct ActiveTask {
    /// Task id assigned by the scheduler
    pub task_id: String,

    /// Current state
    pub state: WorkerState,

    /// When the launch was accepted
    pub received_at: Instant,

    /// When the search started
    pub started_at: Option<Instant>,

    /// When the worker reached a terminal state
    pub completed_at: Option<Instant>,

    /// Cancellation handle for the search loop
    pub cancel: CancelToken,

    /// Join handle for the spawned worker
    pub join: Option<JoinHandle<()>>,

    /// Error message if failed
    pub error: Option<String>,
}

impl ActiveTask {
    fn new(task_id: String, cancel: CancelToken) -> Self {
        Self {
            task_id,
            state: WorkerState::Launched,
            received_at: Instant::now(),
            started_at: None,
            completed_at: None,
            cancel,
            join: None,
            error: None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, WorkerState::Finished | WorkerState::Failed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Tracker
// ─────────────────────────────────────────────────────────────────

/// Tracks all outstanding and recently completed workers.
///
/// Shared between the lifecycle (launch/kill paths) and the workers
/// themselves (state transitions); entries are independent, so a plain
/// map behind a lock suffices.
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, ActiveTask>>,
    max_concurrent: usize,
    finished_count: RwLock<u64>,
    failed_count: RwLock<u64>,
}

impl TaskTracker {
    /// Create a tracker with a concurrency bound
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_concurrent,
            finished_count: RwLock::new(0),
            failed_count: RwLock::new(0),
        }
    }

    /// Register a launched task. Returns false when the concurrency bound
    /// is reached or the task id is already tracked.
    pub fn add_task(&self, task_id: &str, cancel: CancelToken) -> bool {
        let mut tasks = self.tasks.write();

        let active = tasks.values().filter(|t| !t.is_terminal()).count();
        if active >= self.max_concurrent || tasks.contains_key(task_id) {
            return false;
        }

        tasks.insert(
            task_id.to_string(),
            ActiveTask::new(task_id.to_string(), cancel),
        );
        true
    }

    /// Attach the spawned worker's join handle
    pub fn attach_handle(&self, task_id: &str, handle: JoinHandle<()>) {
        if let Some(task) = self.tasks.write().get_mut(task_id) {
            task.join = Some(handle);
        }
    }

    /// Mark a task's search as running
    pub fn mark_running(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.get_mut(task_id) {
            task.state = WorkerState::Running;
            task.started_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Mark a task finished
    pub fn mark_finished(&self, task_id: &str) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.get_mut(task_id) {
            task.state = WorkerState::Finished;
            task.completed_at = Some(Instant::now());
            *self.finished_count.write() += 1;
        }
    }

    /// Mark a task failed
    pub fn mark_failed(&self, task_id: &str, error: String) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.get_mut(task_id) {
            task.state = WorkerState::Failed;
            task.completed_at = Some(Instant::now());
            task.error = Some(error);
            *self.failed_count.write() += 1;
        }
    }

    /// Request cancellation of one task. Returns true if the task was
    /// still in flight; the worker observes the token at the next round
    /// boundary and reports FAILED itself.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let tasks = self.tasks.read();
        match tasks.get(task_id) {
            Some(task) if !task.is_terminal() => {
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every in-flight task, returning their ids
    pub fn cancel_all(&self) -> Vec<String> {
        let tasks = self.tasks.read();
        tasks
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| {
                t.cancel.cancel();
                t.task_id.clone()
            })
            .collect()
    }

    /// Take the join handles of every tracked worker (for draining)
    pub fn take_handles(&self) -> Vec<(String, JoinHandle<()>)> {
        let mut tasks = self.tasks.write();
        tasks
            .iter_mut()
            .filter_map(|(id, t)| t.join.take().map(|h| (id.clone(), h)))
            .collect()
    }

    /// Ids of tasks that are not yet terminal
    pub fn active_task_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .values()
            .filter(|t| !t.is_terminal())
            .map(|t| t.task_id.clone())
            .collect()
    }

    /// Count of tasks currently running a search
    pub fn running_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.state == WorkerState::Running)
            .count()
    }

    /// Whether another task can be accepted
    pub fn can_accept(&self) -> bool {
        let tasks = self.tasks.read();
        tasks.values().filter(|t| !t.is_terminal()).count() < self.max_concurrent
    }

    /// Total finished since startup
    pub fn total_finished(&self) -> u64 {
        *self.finished_count.read()
    }

    /// Total failed since startup
    pub fn total_failed(&self) -> u64 {
        *self.failed_count.read()
    }

    /// Drop old terminal entries, keeping the most recent `keep_count`
    pub fn cleanup_old_tasks(&self, keep_count: usize) {
        let mut tasks = self.tasks.write();

        let mut terminal: Vec<_> = tasks
            .iter()
            .filter(|(_, t)| t.is_terminal())
            .map(|(id, t)| (id.clone(), t.completed_at))
            .collect();

        terminal.sort_by(|a, b| a.1.cmp(&b.1));

        let to_remove = terminal.len().saturating_sub(keep_count);
        for (id, _) in terminal.into_iter().take(to_remove) {
            tasks.remove(&id);
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(4)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let tracker = TaskTracker::new(4);
        assert!(tracker.add_task("task-1", CancelToken::new()));
        assert_eq!(tracker.running_count(), 0);

        tracker.mark_running("task-1");
        assert_eq!(tracker.running_count(), 1);

        tracker.mark_finished("task-1");
        assert_eq!(tracker.running_count(), 0);
        assert_eq!(tracker.total_finished(), 1);
    }

    #[test]
    fn test_concurrency_bound() {
        let tracker = TaskTracker::new(2);
        assert!(tracker.add_task("task-1", CancelToken::new()));
        assert!(tracker.add_task("task-2", CancelToken::new()));
        assert!(!tracker.add_task("task-3", CancelToken::new()));
        assert!(!tracker.can_accept());

        // Terminal tasks free a slot.
        tracker.mark_failed("task-1", "boom".to_string());
        assert!(tracker.can_accept());
        assert!(tracker.add_task("task-3", CancelToken::new()));
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let tracker = TaskTracker::new(4);
        assert!(tracker.add_task("task-1", CancelToken::new()));
        assert!(!tracker.add_task("task-1", CancelToken::new()));
    }

    #[test]
    fn test_cancel_task_flips_token() {
        let tracker = TaskTracker::new(4);
        let cancel = CancelToken::new();
        tracker.add_task("task-1", cancel.clone());
        tracker.mark_running("task-1");

        assert!(tracker.cancel_task("task-1"));
        assert!(cancel.is_cancelled());

        // Terminal tasks cannot be cancelled.
        tracker.mark_failed("task-1", "cancelled".to_string());
        assert!(!tracker.cancel_task("task-1"));
    }

    #[test]
    fn test_cancel_all_returns_inflight_ids() {
        let tracker = TaskTracker::new(4);
        tracker.add_task("task-1", CancelToken::new());
        tracker.add_task("task-2", CancelToken::new());
        tracker.mark_running("task-1");
        tracker.mark_finished("task-1");

        let mut abandoned = tracker.cancel_all();
        abandoned.sort();
        assert_eq!(abandoned, vec!["task-2".to_string()]);
    }

    #[test]
    fn test_active_task_ids() {
        let tracker = TaskTracker::new(4);
        tracker.add_task("task-1", CancelToken::new());
        tracker.add_task("task-2", CancelToken::new());
        tracker.mark_running("task-1");

        let mut ids = tracker.active_task_ids();
        ids.sort();
        assert_eq!(ids, vec!["task-1".to_string(), "task-2".to_string()]);
    }

    #[test]
    fn test_cleanup_old_tasks() {
        let tracker = TaskTracker::new(16);
        for i in 0..6 {
            let id = format!("task-{i}");
            tracker.add_task(&id, CancelToken::new());
            tracker.mark_finished(&id);
        }

        tracker.cleanup_old_tasks(2);
        assert_eq!(tracker.tasks.read().len(), 2);
    }
}
