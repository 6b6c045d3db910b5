//! Background task bookkeeping for the processing worker.
//!
//! Workers run on plain threads and report through mpsc channels; the
//! in-process cancel flag is the fast path over the persisted task row.
//! Incremental progress lives on that row too, so the channel only carries
//! the terminal outcome.

pub mod manager;

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

pub use manager::BackgroundTaskManager;

/// Unique identifier for a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Terminal updates sent from worker threads via channels.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Task completed successfully.
    Completed { message: String },
    /// Task acknowledged a cancel request and stopped.
    Cancelled,
    /// Task failed with error.
    Failed { error: String },
}

/// A registered background task with its control handles.
pub struct BackgroundTask {
    pub id: TaskId,
    pub state: TaskState,
    pub cancel_flag: Arc<AtomicBool>,
    pub receiver: mpsc::Receiver<TaskUpdate>,
}

impl BackgroundTask {
    pub fn new(cancel_flag: Arc<AtomicBool>, receiver: mpsc::Receiver<TaskUpdate>) -> Self {
        Self {
            id: TaskId::new(),
            state: TaskState::Running,
            cancel_flag,
            receiver,
        }
    }

    /// Request cancellation of this task.
    pub fn cancel(&self) {
        self.cancel_flag
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// Result of polling task updates.
#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
    pub id: TaskId,
    pub message: String,
    pub success: bool,
}
