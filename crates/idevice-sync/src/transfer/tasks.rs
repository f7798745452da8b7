//! Task tracking for long-running subtree copies.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ignore_poison::IgnorePoison;

/// Identifier handed out by a `TaskTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(pub u64);

/// Receives one task per subtree copy, for progress display.
pub trait TaskTracker: Send + Sync {
    /// Registers a task and marks it started.
    fn start_task(&self, description: &str) -> TaskId;

    /// Reports progress. `total` is 0 when unknown.
    fn set_task_progress(&self, _task_id: TaskId, _progress: u64, _total: u64) {}
}

/// Snapshot of one tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: TaskId,
    pub description: String,
    pub progress: u64,
    pub total: u64,
    /// Unix timestamp in milliseconds.
    pub started_at: u64,
}

/// Keeps tasks in memory. Used by headless callers and tests.
#[derive(Debug)]
pub struct InMemoryTaskTracker {
    next_id: AtomicU64,
    tasks: Mutex<Vec<TaskSummary>>,
}

impl Default for InMemoryTaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// All tasks, in registration order.
    pub fn tasks(&self) -> Vec<TaskSummary> {
        self.tasks.lock_ignore_poison().clone()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock_ignore_poison().len()
    }
}

impl TaskTracker for InMemoryTaskTracker {
    fn start_task(&self, description: &str) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let started_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        self.tasks.lock_ignore_poison().push(TaskSummary {
            id,
            description: description.to_string(),
            progress: 0,
            total: 0,
            started_at,
        });
        log::debug!("start_task: {:?} {}", id, description);
        id
    }

    fn set_task_progress(&self, task_id: TaskId, progress: u64, total: u64) {
        if let Some(task) = self.tasks.lock_ignore_poison().iter_mut().find(|t| t.id == task_id) {
            task.progress = progress;
            task.total = total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let tracker = InMemoryTaskTracker::new();
        let a = tracker.start_task("Copying /iTunes_Control/Artwork");
        let b = tracker.start_task("Copying /iTunes_Control/Device");

        assert_ne!(a, b);
        let tasks = tracker.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, a);
        assert_eq!(tasks[1].description, "Copying /iTunes_Control/Device");
        assert!(tasks[0].started_at > 0);
    }

    #[test]
    fn test_progress_updates_the_right_task() {
        let tracker = InMemoryTaskTracker::new();
        tracker.start_task("a");
        let b = tracker.start_task("b");

        tracker.set_task_progress(b, 3, 0);
        let tasks = tracker.tasks();
        assert_eq!(tasks[0].progress, 0);
        assert_eq!(tasks[1].progress, 3);

        // Unknown ids are ignored.
        tracker.set_task_progress(TaskId(99), 1, 1);
        assert_eq!(tracker.task_count(), 2);
    }
}
