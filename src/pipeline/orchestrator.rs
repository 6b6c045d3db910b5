//! Pipeline orchestration: task lifecycle, stage sequencing and the
//! work-discovery loop.
//!
//! A run makes repeated passes over the card, each pass draining whatever
//! extraction, detection and matching work the database currently holds.
//! Passes repeat until a pass finds nothing, bounded by `max_iterations`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::config::ProcessingConfig;
use crate::db::{Database, TaskStatus};
use crate::tasks::{BackgroundTaskManager, TaskId, TaskUpdate};

use super::detect::run_detection;
use super::extract::run_extraction;
use super::matching::{reconcile_card_completion, refresh_consent_embeddings, run_matching};
use super::{CancelToken, Engines, StageOutcome};

/// Start a processing run for a card on a background thread.
///
/// Returns the persisted task row id and the in-process task id. Refuses
/// to start while the card already has a live task.
pub fn start_processing(
    db: &Database,
    db_path: PathBuf,
    card_id: i64,
    engines: Engines,
    frames_root: PathBuf,
    config: ProcessingConfig,
    manager: &mut BackgroundTaskManager,
) -> Result<(i64, TaskId)> {
    config.validate()?;

    if db.has_running_task(card_id)? {
        return Err(anyhow!("card {card_id} already has a running task"));
    }

    let db_task_id = db.create_task(card_id)?;
    let (runtime_id, tx, cancel_flag) = manager.register_task();

    std::thread::spawn(move || {
        let worker = || -> Result<StageOutcome> {
            let db = Database::open(&db_path)?;
            let cancel = CancelToken::new(db_task_id, cancel_flag);
            run_card_task(&db, &engines, card_id, &frames_root, &config, &cancel)
        };

        let update = match worker() {
            Ok(StageOutcome::Finished) => TaskUpdate::Completed {
                message: format!("card {card_id} processed"),
            },
            Ok(StageOutcome::Cancelled) => TaskUpdate::Cancelled,
            Err(e) => {
                tracing::error!(card_id, error = %e, "Processing task failed");
                if let Ok(db) = Database::open(&db_path) {
                    let _ = db.mark_task_error(db_task_id, &e.to_string());
                }
                TaskUpdate::Failed {
                    error: e.to_string(),
                }
            }
        };
        let _ = tx.send(update);
    });

    tracing::info!(card_id, db_task_id, "Processing started");
    Ok((db_task_id, runtime_id))
}

/// Request cancellation of a running task: durable row first, then the
/// in-process fast path. Returns false when nothing was running.
pub fn stop_processing(
    db: &Database,
    db_task_id: i64,
    manager: &mut BackgroundTaskManager,
    runtime_id: TaskId,
) -> Result<bool> {
    let requested = db.request_task_cancel(db_task_id)?;
    manager.cancel_task(runtime_id);
    if requested {
        tracing::info!(db_task_id, "Cancellation requested");
    }
    Ok(requested)
}

/// The worker body. Public so tests drive a full run synchronously with
/// scripted engines.
pub fn run_card_task(
    db: &Database,
    engines: &Engines,
    card_id: i64,
    frames_root: &Path,
    config: &ProcessingConfig,
    cancel: &CancelToken,
) -> Result<StageOutcome> {
    let project_id = db
        .project_id_for_card(card_id)?
        .ok_or_else(|| anyhow!("card {card_id} not found"))?;

    db.set_task_running_status(cancel.task_id(), TaskStatus::GeneratingEmbeddings)?;
    db.update_task_progress(cancel.task_id(), "generating_embeddings", 0.0, None)?;
    let consent = refresh_consent_embeddings(db, engines.embedder.as_ref(), project_id)?;
    tracing::info!(card_id, consent_faces = consent.len(), "Consent embeddings ready");

    for pass in 1..=config.max_iterations {
        if cancel.is_cancelled(db)? {
            return finish_cancelled(db, cancel);
        }

        // A prior run may have stopped between a child's terminal update
        // and the parent rollup, leaving no pending work to trigger it.
        reconcile_card_completion(db, card_id)?;

        let clips = db.count_clips_to_extract(card_id)?;
        let frames = db.count_frames_to_detect(card_id)?;
        let faces = db.count_faces_to_match(card_id)?;
        if clips == 0 && frames == 0 && faces == 0 {
            break;
        }
        tracing::debug!(card_id, pass, clips, frames, faces, "Work discovery pass");

        if clips > 0 {
            if !db.set_task_running_status(cancel.task_id(), TaskStatus::ExtractingFrames)? {
                return finish_cancelled(db, cancel);
            }
            if run_extraction(db, engines.sampler.as_ref(), card_id, frames_root, config, cancel)?
                == StageOutcome::Cancelled
            {
                return finish_cancelled(db, cancel);
            }
        }

        if !db.set_task_running_status(cancel.task_id(), TaskStatus::ProcessingClips)? {
            return finish_cancelled(db, cancel);
        }
        if run_detection(db, engines.detector.as_ref(), card_id, config, cancel)?
            == StageOutcome::Cancelled
        {
            return finish_cancelled(db, cancel);
        }
        if run_matching(db, engines.embedder.as_ref(), card_id, &consent, config, cancel)?
            == StageOutcome::Cancelled
        {
            return finish_cancelled(db, cancel);
        }
    }

    let remaining = db.count_clips_to_extract(card_id)?
        + db.count_frames_to_detect(card_id)?
        + db.count_faces_to_match(card_id)?;
    if remaining > 0 {
        let message = format!(
            "{remaining} items still pending after {} passes",
            config.max_iterations
        );
        tracing::error!(card_id, remaining, "Run stopped by the pass limit");
        db.mark_task_error(cancel.task_id(), &message)?;
        return Err(anyhow!(message));
    }

    db.mark_task_complete(cancel.task_id())?;
    tracing::info!(card_id, "Processing complete");
    Ok(StageOutcome::Finished)
}

fn finish_cancelled(db: &Database, cancel: &CancelToken) -> Result<StageOutcome> {
    // Ensure the row is in 'cancelling' even when only the in-process flag
    // fired, then acknowledge.
    db.request_task_cancel(cancel.task_id())?;
    db.mark_task_cancelled(cancel.task_id())?;
    tracing::info!(task_id = cancel.task_id(), "Task cancelled");
    Ok(StageOutcome::Cancelled)
}
