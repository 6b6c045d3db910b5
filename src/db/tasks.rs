//! Processing task rows.
//!
//! The task row is the durable half of cancellation: `request_cancel` flips
//! a running row to `cancelling`, and the worker polls for that status at
//! item boundaries. The in-process atomic flag is just a fast path over the
//! same signal.

use anyhow::Result;
use rusqlite::params;

use super::status::TaskStatus;
use super::Database;

#[derive(Debug, Clone)]
pub struct ProcessingTaskRecord {
    pub id: i64,
    pub card_id: i64,
    pub status: TaskStatus,
    pub stage: Option<String>,
    pub progress: f64,
    pub message: Option<String>,
}

const RUNNING_STATUSES: &str =
    "'pending', 'generating_embeddings', 'extracting_frames', 'processing_clips'";

impl Database {
    pub fn create_task(&self, card_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO processing_tasks (card_id, status) VALUES (?, 'pending')",
            [card_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_task(&self, id: i64) -> Result<Option<ProcessingTaskRecord>> {
        let result = self.conn.query_row(
            "SELECT id, card_id, status, stage, progress, message \
             FROM processing_tasks WHERE id = ?",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        );
        match result {
            Ok(raw) => Ok(Some(ProcessingTaskRecord {
                id: raw.0,
                card_id: raw.1,
                status: raw.2.parse()?,
                stage: raw.3,
                progress: raw.4,
                message: raw.5,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn task_status(&self, id: i64) -> Result<TaskStatus> {
        let status: String = self.conn.query_row(
            "SELECT status FROM processing_tasks WHERE id = ?",
            [id],
            |row| row.get(0),
        )?;
        status.parse()
    }

    /// Advance the worker through its running stages. Refuses to touch a row
    /// that has left the running set, so a cancel or error sticks.
    pub fn set_task_running_status(&self, id: i64, status: TaskStatus) -> Result<bool> {
        if !status.is_running() {
            anyhow::bail!("{status} is not a running task status");
        }
        let changed = self.conn.execute(
            &format!(
                "UPDATE processing_tasks SET status = ?, updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ? AND status IN ({RUNNING_STATUSES})"
            ),
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn update_task_progress(
        &self,
        id: i64,
        stage: &str,
        progress: f64,
        message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE processing_tasks SET stage = ?, progress = ?, message = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![stage, progress.clamp(0.0, 1.0), message, id],
        )?;
        Ok(())
    }

    /// Durable stop request. Returns false when the task already finished,
    /// so callers can tell the user nothing was running.
    pub fn request_task_cancel(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE processing_tasks SET status = 'cancelling', \
                 updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ? AND status IN ({RUNNING_STATUSES})"
            ),
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Worker acknowledgement of a cancel request.
    pub fn mark_task_cancelled(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE processing_tasks SET status = 'cancelled', progress = 0.0, \
             message = 'cancelled by user', updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status = 'cancelling'",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_task_complete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE processing_tasks SET status = 'complete', progress = 1.0, \
                 stage = 'complete', updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ? AND status IN ({RUNNING_STATUSES})"
            ),
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_task_error(&self, id: i64, message: &str) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE processing_tasks SET status = 'error', message = ?, \
                 updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ? AND status IN ({RUNNING_STATUSES}, 'cancelling')"
            ),
            params![message, id],
        )?;
        Ok(changed > 0)
    }

    /// Whether the card already has a live task. Enforces one task per card.
    pub fn has_running_task(&self, card_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM processing_tasks \
                 WHERE card_id = ? AND status IN ({RUNNING_STATUSES}, 'cancelling')"
            ),
            [card_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Startup sweep: no worker survives a restart, so any row still claiming
    /// to run is settled here before new work starts.
    pub fn resolve_stale_tasks(&self) -> Result<usize> {
        let cancelled = self.conn.execute(
            "UPDATE processing_tasks SET status = 'cancelled', \
             message = 'cancelled before restart', updated_at = CURRENT_TIMESTAMP \
             WHERE status = 'cancelling'",
            [],
        )?;
        let interrupted = self.conn.execute(
            &format!(
                "UPDATE processing_tasks SET status = 'error', \
                 message = 'interrupted by restart', updated_at = CURRENT_TIMESTAMP \
                 WHERE status IN ({RUNNING_STATUSES})"
            ),
            [],
        )?;
        Ok(cancelled + interrupted)
    }

    pub fn latest_task_for_card(&self, card_id: i64) -> Result<Option<ProcessingTaskRecord>> {
        let result = self.conn.query_row(
            "SELECT id FROM processing_tasks WHERE card_id = ? ORDER BY id DESC LIMIT 1",
            [card_id],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(id) => self.get_task(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        (db, card)
    }

    #[test]
    fn cancel_wins_over_stage_updates() {
        let (db, card) = fixture();
        let task = db.create_task(card).unwrap();

        assert!(db
            .set_task_running_status(task, TaskStatus::ProcessingClips)
            .unwrap());
        assert!(db.request_task_cancel(task).unwrap());
        // A stale worker trying to advance the stage must lose.
        assert!(!db
            .set_task_running_status(task, TaskStatus::ExtractingFrames)
            .unwrap());
        assert!(!db.mark_task_complete(task).unwrap());
        assert!(db.mark_task_cancelled(task).unwrap());
        assert_eq!(db.task_status(task).unwrap(), TaskStatus::Cancelled);
    }

    #[test]
    fn cancel_after_completion_reports_nothing_running() {
        let (db, card) = fixture();
        let task = db.create_task(card).unwrap();
        assert!(db.mark_task_complete(task).unwrap());
        assert!(!db.request_task_cancel(task).unwrap());
    }

    #[test]
    fn one_running_task_per_card() {
        let (db, card) = fixture();
        assert!(!db.has_running_task(card).unwrap());
        let task = db.create_task(card).unwrap();
        assert!(db.has_running_task(card).unwrap());
        db.request_task_cancel(task).unwrap();
        // Cancelling still counts as live until the worker acknowledges.
        assert!(db.has_running_task(card).unwrap());
        db.mark_task_cancelled(task).unwrap();
        assert!(!db.has_running_task(card).unwrap());
    }

    #[test]
    fn stale_tasks_settle_on_startup() {
        let (db, card) = fixture();
        let running = db.create_task(card).unwrap();
        db.set_task_running_status(running, TaskStatus::ExtractingFrames)
            .unwrap();
        let cancelling = db.create_task(card).unwrap();
        db.request_task_cancel(cancelling).unwrap();

        assert_eq!(db.resolve_stale_tasks().unwrap(), 2);
        assert_eq!(db.task_status(running).unwrap(), TaskStatus::Error);
        assert_eq!(db.task_status(cancelling).unwrap(), TaskStatus::Cancelled);
    }
}
