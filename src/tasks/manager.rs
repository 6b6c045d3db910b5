//! Background task manager for tracking and controlling worker threads.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

use super::{BackgroundTask, TaskCompletionInfo, TaskId, TaskState, TaskUpdate};

/// Tracks every registered background task and drains their channels.
pub struct BackgroundTaskManager {
    tasks: HashMap<TaskId, BackgroundTask>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a new background task.
    /// Returns the TaskId, a sender for the task to send updates, and the
    /// shared cancel flag.
    pub fn register_task(&mut self) -> (TaskId, mpsc::Sender<TaskUpdate>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let task = BackgroundTask::new(cancel_flag.clone(), rx);
        let id = task.id;

        self.tasks.insert(id, task);

        (id, tx, cancel_flag)
    }

    /// Cancel a specific task by ID.
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        if let Some(task) = self.tasks.get(&id) {
            if task.is_running() {
                task.cancel();
                return true;
            }
        }
        false
    }

    /// Poll all task channels for updates.
    /// Returns completion info for tasks that finished since the last poll.
    pub fn poll_updates(&mut self) -> Vec<TaskCompletionInfo> {
        let mut completed = Vec::new();

        let task_ids: Vec<TaskId> = self.tasks.keys().copied().collect();

        for id in task_ids {
            if let Some(task) = self.tasks.get_mut(&id) {
                while let Ok(update) = task.receiver.try_recv() {
                    match update {
                        TaskUpdate::Completed { message } => {
                            task.state = TaskState::Completed;
                            completed.push(TaskCompletionInfo {
                                id,
                                message,
                                success: true,
                            });
                        }
                        TaskUpdate::Cancelled => {
                            task.state = TaskState::Cancelled;
                            completed.push(TaskCompletionInfo {
                                id,
                                message: "Cancelled".to_string(),
                                success: false,
                            });
                        }
                        TaskUpdate::Failed { error } => {
                            task.state = TaskState::Failed(error.clone());
                            completed.push(TaskCompletionInfo {
                                id,
                                message: error,
                                success: false,
                            });
                        }
                    }
                }
            }
        }

        // Remove completed tasks from tracking
        for info in &completed {
            self.tasks.remove(&info.id);
        }

        completed
    }

    /// Check if any tasks are running.
    pub fn has_running_tasks(&self) -> bool {
        self.tasks.values().any(|t| t.is_running())
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_tasks_are_drained() {
        let mut manager = BackgroundTaskManager::new();
        let (id, tx, _flag) = manager.register_task();
        assert!(manager.has_running_tasks());

        tx.send(TaskUpdate::Completed {
            message: "done".into(),
        })
        .unwrap();

        let completed = manager.poll_updates();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, id);
        assert!(completed[0].success);
        assert!(!manager.has_running_tasks());
    }

    #[test]
    fn failure_and_cancellation_report_unsuccessful() {
        let mut manager = BackgroundTaskManager::new();
        let (_a, tx_a, _) = manager.register_task();
        let (_b, tx_b, _) = manager.register_task();

        tx_a.send(TaskUpdate::Failed {
            error: "broken".into(),
        })
        .unwrap();
        tx_b.send(TaskUpdate::Cancelled).unwrap();

        let completed = manager.poll_updates();
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|c| !c.success));
        assert!(!manager.has_running_tasks());
    }

    #[test]
    fn cancel_trips_the_shared_flag() {
        let mut manager = BackgroundTaskManager::new();
        let (id, _tx, flag) = manager.register_task();
        assert!(manager.cancel_task(id));
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
