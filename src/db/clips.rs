//! Clip rows and the clip status state machine.
//!
//! Pipeline-owned transitions are guarded by status-set WHERE clauses: a
//! transition applies only when the clip is in a legal predecessor state, so
//! resumption after a crash re-enters cleanly and nothing ever regresses.

use anyhow::Result;
use rusqlite::params;

use super::status::ClipStatus;
use super::Database;

#[derive(Debug, Clone)]
pub struct ClipRecord {
    pub id: i64,
    pub card_id: i64,
    pub watch_folder_id: Option<i64>,
    pub filename: String,
    pub path: String,
    pub status: ClipStatus,
    pub error_message: Option<String>,
}

fn row_to_clip(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, Option<i64>, String, String, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build_clip(
    raw: (i64, i64, Option<i64>, String, String, String, Option<String>),
) -> Result<ClipRecord> {
    Ok(ClipRecord {
        id: raw.0,
        card_id: raw.1,
        watch_folder_id: raw.2,
        filename: raw.3,
        path: raw.4,
        status: raw.5.parse()?,
        error_message: raw.6,
    })
}

const CLIP_COLUMNS: &str = "id, card_id, watch_folder_id, filename, path, status, error_message";

impl Database {
    pub fn insert_clip(
        &self,
        card_id: i64,
        watch_folder_id: Option<i64>,
        filename: &str,
        path: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO clips (card_id, watch_folder_id, filename, path, status) \
             VALUES (?, ?, ?, ?, 'pending')",
            params![card_id, watch_folder_id, filename, path],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_clip(&self, id: i64) -> Result<Option<ClipRecord>> {
        let result = self.conn.query_row(
            &format!("SELECT {CLIP_COLUMNS} FROM clips WHERE id = ?"),
            [id],
            row_to_clip,
        );
        match result {
            Ok(raw) => Ok(Some(build_clip(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a clip by the (card, filename) uniqueness key.
    pub fn find_clip_by_filename(&self, card_id: i64, filename: &str) -> Result<Option<ClipRecord>> {
        let result = self.conn.query_row(
            &format!("SELECT {CLIP_COLUMNS} FROM clips WHERE card_id = ? AND filename = ?"),
            params![card_id, filename],
            row_to_clip,
        );
        match result {
            Ok(raw) => Ok(Some(build_clip(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh the stored path of a known clip without touching its status.
    pub fn update_clip_path(&self, id: i64, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE clips SET path = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![path, id],
        )?;
        Ok(())
    }

    /// User-facing selection toggle, only valid among the pre-processing
    /// statuses.
    pub fn set_clip_selection(&self, id: i64, status: ClipStatus) -> Result<bool> {
        if !status.is_selectable() {
            anyhow::bail!("{status} is not a selectable clip status");
        }
        let changed = self.conn.execute(
            "UPDATE clips SET status = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status IN ('pending', 'unselected', 'queued')",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Clips due for frame extraction. Includes `extracting_frames` so a run
    /// that died mid-stage picks the clip back up.
    pub fn clips_to_extract(&self, card_id: i64) -> Result<Vec<ClipRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLIP_COLUMNS} FROM clips \
             WHERE card_id = ? AND status IN ('queued', 'extracting_frames') \
             ORDER BY filename"
        ))?;
        let rows = stmt
            .query_map([card_id], row_to_clip)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(build_clip).collect()
    }

    pub fn count_clips_to_extract(&self, card_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM clips \
             WHERE card_id = ? AND status IN ('queued', 'extracting_frames')",
            [card_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Crash-safety marker written before extraction begins.
    pub fn mark_clip_extracting(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE clips SET status = 'extracting_frames', error_message = NULL, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status IN ('queued', 'extracting_frames')",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_clip_extraction_complete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE clips SET status = 'extraction_complete', updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status = 'extracting_frames'",
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Record a frame-extraction failure. Detection/matching failures never
    /// land here; they stay at frame/face granularity.
    pub fn mark_clip_error(&self, id: i64, message: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE clips SET status = 'error', error_message = ?, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status IN ('queued', 'extracting_frames')",
            params![message, id],
        )?;
        Ok(changed > 0)
    }

    /// Aggregate: a clip completes once every frame it owns is terminal.
    /// Only applies to clips that finished extraction; guarded so it is safe
    /// to call repeatedly.
    pub fn mark_clip_processing_complete_if_done(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE clips SET status = 'processing_complete', updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND status = 'extraction_complete'
              AND EXISTS (SELECT 1 FROM frames WHERE clip_id = clips.id)
              AND NOT EXISTS (
                  SELECT 1 FROM frames
                  WHERE clip_id = clips.id
                    AND status NOT IN ('recognition_complete', 'error')
              )
            "#,
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn clip_status(&self, id: i64) -> Result<ClipStatus> {
        let status: String =
            self.conn
                .query_row("SELECT status FROM clips WHERE id = ?", [id], |row| {
                    row.get(0)
                })?;
        status.parse()
    }

    pub fn clip_ids_with_status(&self, card_id: i64, status: ClipStatus) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM clips WHERE card_id = ? AND status = ? ORDER BY filename",
        )?;
        let ids = stmt
            .query_map(params![card_id, status.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn count_clips_for_card(&self, card_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM clips WHERE card_id = ?",
            [card_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn card_fixture(db: &Database) -> i64 {
        let project = db.create_project("p").unwrap();
        db.create_card(project, "card-a").unwrap()
    }

    #[test]
    fn selection_toggles_only_before_processing() {
        let db = test_db();
        let card = card_fixture(&db);
        let clip = db.insert_clip(card, None, "a.mp4", "/media/a.mp4").unwrap();

        assert!(db.set_clip_selection(clip, ClipStatus::Queued).unwrap());
        assert!(db.set_clip_selection(clip, ClipStatus::Unselected).unwrap());
        assert!(db.set_clip_selection(clip, ClipStatus::Queued).unwrap());

        assert!(db.mark_clip_extracting(clip).unwrap());
        // Processing owns the clip now; user toggles no longer apply.
        assert!(!db.set_clip_selection(clip, ClipStatus::Pending).unwrap());
        assert_eq!(db.clip_status(clip).unwrap(), ClipStatus::ExtractingFrames);
    }

    #[test]
    fn extraction_transitions_are_guarded() {
        let db = test_db();
        let card = card_fixture(&db);
        let clip = db.insert_clip(card, None, "a.mp4", "/media/a.mp4").unwrap();

        // Not queued yet: extraction must not start.
        assert!(!db.mark_clip_extracting(clip).unwrap());

        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();
        assert!(db.mark_clip_extracting(clip).unwrap());
        // Re-entry while mid-stage is allowed (resumption).
        assert!(db.mark_clip_extracting(clip).unwrap());
        assert!(db.mark_clip_extraction_complete(clip).unwrap());
        // No regression after completion.
        assert!(!db.mark_clip_extracting(clip).unwrap());
        assert!(!db.mark_clip_error(clip, "late failure").unwrap());
    }

    #[test]
    fn completion_requires_all_frames_terminal() {
        let db = test_db();
        let card = card_fixture(&db);
        let clip = db.insert_clip(card, None, "a.mp4", "/media/a.mp4").unwrap();
        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();
        db.mark_clip_extracting(clip).unwrap();

        let f1 = db.insert_frame(clip, "00:00:00:00", "/frames/1.png").unwrap();
        let f2 = db.insert_frame(clip, "00:00:01:00", "/frames/2.png").unwrap();
        db.mark_clip_extraction_complete(clip).unwrap();

        db.mark_frame_detecting(f1).unwrap();
        db.mark_frame_recognition_complete(f1).unwrap();
        assert!(!db.mark_clip_processing_complete_if_done(clip).unwrap());

        db.mark_frame_detecting(f2).unwrap();
        db.mark_frame_error(f2).unwrap();
        assert!(db.mark_clip_processing_complete_if_done(clip).unwrap());
        assert_eq!(db.clip_status(clip).unwrap(), ClipStatus::ProcessingComplete);

        // Idempotent and monotonic.
        assert!(!db.mark_clip_processing_complete_if_done(clip).unwrap());
    }
}
