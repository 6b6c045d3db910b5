//! The card processing pipeline.
//!
//! Stages run in sequence inside a worker thread: consent embedding
//! refresh, frame extraction, face detection, face matching. Each stage
//! drains the work the database currently holds, checking for cancellation
//! at item boundaries. Work is discovered from entity statuses, never from
//! in-memory queues, so a run resumes cleanly after a crash.

pub mod detect;
pub mod extract;
pub mod matching;
pub mod orchestrator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::db::{Database, TaskStatus};
use crate::engine::{FaceDetector, FaceEmbedder, FrameSampler};

pub use orchestrator::{run_card_task, start_processing, stop_processing};

/// The three engine seams bundled for the worker. Trait objects so tests
/// substitute scripted engines.
#[derive(Clone)]
pub struct Engines {
    pub sampler: Arc<dyn FrameSampler + Send + Sync>,
    pub detector: Arc<dyn FaceDetector + Send + Sync>,
    pub embedder: Arc<dyn FaceEmbedder + Send + Sync>,
}

/// Cancellation signal for one task run. The persisted task row is the
/// source of truth; the atomic flag short-circuits the database read when
/// the stop request came from this process.
#[derive(Clone)]
pub struct CancelToken {
    task_id: i64,
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new(task_id: i64, flag: Arc<AtomicBool>) -> Self {
        Self { task_id, flag }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    /// Checked at item boundaries; the current item always runs to its own
    /// completion before the stage yields.
    pub fn is_cancelled(&self, db: &Database) -> Result<bool> {
        if self.flag.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let status = db.task_status(self.task_id)?;
        Ok(status == TaskStatus::Cancelling)
    }
}

/// What a stage did with the work it found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// All discovered work was drained.
    Finished,
    /// A cancel request interrupted the stage between items.
    Cancelled,
}
