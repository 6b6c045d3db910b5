//! Frame rows: bulk creation by extraction, status ownership by detection,
//! terminal aggregation driven by matching.

use anyhow::Result;
use rusqlite::params;

use super::status::FrameStatus;
use super::Database;

#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub id: i64,
    pub clip_id: i64,
    pub timestamp: String,
    pub raw_image_path: String,
    pub processed_image_path: Option<String>,
    pub status: FrameStatus,
}

impl Database {
    pub fn insert_frame(&self, clip_id: i64, timestamp: &str, raw_image_path: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO frames (clip_id, timestamp, raw_image_path, status) \
             VALUES (?, ?, ?, 'queued')",
            params![clip_id, timestamp, raw_image_path],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Frames due for face detection across all clips of a card, in timecode
    /// order. Includes `detecting_faces` for mid-stage resumption.
    pub fn frames_to_detect(&self, card_id: i64) -> Result<Vec<FrameRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.id, f.clip_id, f.timestamp, f.raw_image_path, f.processed_image_path, f.status
            FROM frames f
            JOIN clips c ON c.id = f.clip_id
            WHERE c.card_id = ? AND f.status IN ('queued', 'detecting_faces')
            ORDER BY f.clip_id, f.timestamp
            "#,
        )?;
        let rows = stmt
            .query_map([card_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|raw| {
                Ok(FrameRecord {
                    id: raw.0,
                    clip_id: raw.1,
                    timestamp: raw.2,
                    raw_image_path: raw.3,
                    processed_image_path: raw.4,
                    status: raw.5.parse()?,
                })
            })
            .collect()
    }

    pub fn count_frames_to_detect(&self, card_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM frames f
            JOIN clips c ON c.id = f.clip_id
            WHERE c.card_id = ? AND f.status IN ('queued', 'detecting_faces')
            "#,
            [card_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn mark_frame_detecting(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE frames SET status = 'detecting_faces' \
             WHERE id = ? AND status IN ('queued', 'detecting_faces')",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_frame_detection_complete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE frames SET status = 'detection_complete' \
             WHERE id = ? AND status = 'detecting_faces'",
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Direct completion for frames with no detections, or the aggregation
    /// step once all detected faces of the frame are terminal.
    pub fn mark_frame_recognition_complete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE frames SET status = 'recognition_complete' \
             WHERE id = ? AND status IN ('detecting_faces', 'detection_complete')",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_frame_error(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE frames SET status = 'error' \
             WHERE id = ? AND status IN ('queued', 'detecting_faces', 'detection_complete')",
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Aggregate step: complete the frame if no owned face is still in
    /// flight. Returns true when the frame transitioned.
    pub fn mark_frame_recognition_complete_if_done(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE frames SET status = 'recognition_complete'
            WHERE id = ? AND status = 'detection_complete'
              AND NOT EXISTS (
                  SELECT 1 FROM detected_faces
                  WHERE frame_id = frames.id
                    AND status NOT IN ('matching_complete', 'error')
              )
            "#,
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Frames still in `detection_complete` for a card. A run that stops
    /// between the last face update and the frame rollup leaves the frame
    /// here with no pending face to trigger the aggregation again.
    pub fn frames_awaiting_rollup(&self, card_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.id FROM frames f
            JOIN clips c ON c.id = f.clip_id
            WHERE c.card_id = ? AND f.status = 'detection_complete'
            ORDER BY f.id
            "#,
        )?;
        let ids = stmt
            .query_map([card_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn set_frame_processed_image(&self, id: i64, processed_image_path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE frames SET processed_image_path = ? WHERE id = ?",
            params![processed_image_path, id],
        )?;
        Ok(())
    }

    pub fn frame_status(&self, id: i64) -> Result<FrameStatus> {
        let status: String =
            self.conn
                .query_row("SELECT status FROM frames WHERE id = ?", [id], |row| {
                    row.get(0)
                })?;
        status.parse()
    }

    pub fn frame_clip_id(&self, id: i64) -> Result<i64> {
        let clip_id = self.conn.query_row(
            "SELECT clip_id FROM frames WHERE id = ?",
            [id],
            |row| row.get(0),
        )?;
        Ok(clip_id)
    }

    pub fn count_frames_for_clip(&self, clip_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM frames WHERE clip_id = ?",
            [clip_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Drop all frames of a clip. Used when re-extracting after a crash
    /// left a partial frame set behind.
    pub fn delete_frames_for_clip(&self, clip_id: i64) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM frames WHERE clip_id = ?", [clip_id])?;
        Ok(deleted)
    }

    pub fn frame_raw_image_path(&self, id: i64) -> Result<String> {
        let path = self.conn.query_row(
            "SELECT raw_image_path FROM frames WHERE id = ?",
            [id],
            |row| row.get(0),
        )?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::status::ClipStatus;

    fn fixture() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        let clip = db.insert_clip(card, None, "a.mp4", "/media/a.mp4").unwrap();
        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();
        (db, clip)
    }

    #[test]
    fn frame_aggregation_waits_for_faces() {
        let (db, clip) = fixture();
        let frame = db.insert_frame(clip, "00:00:00:00", "/f/0.png").unwrap();
        db.mark_frame_detecting(frame).unwrap();

        let face = db
            .insert_detected_face(frame, &BoundingBoxFixture::bbox(), 0.9)
            .unwrap();
        db.mark_frame_detection_complete(frame).unwrap();

        // Face still queued: the frame must stay put.
        assert!(!db.mark_frame_recognition_complete_if_done(frame).unwrap());

        db.mark_face_matching(face).unwrap();
        db.mark_face_matching_complete(face).unwrap();
        assert!(db.mark_frame_recognition_complete_if_done(frame).unwrap());
        assert_eq!(
            db.frame_status(frame).unwrap(),
            FrameStatus::RecognitionComplete
        );
    }

    #[test]
    fn frame_error_is_not_overwritten() {
        let (db, clip) = fixture();
        let frame = db.insert_frame(clip, "00:00:00:00", "/f/0.png").unwrap();
        db.mark_frame_detecting(frame).unwrap();
        db.mark_frame_error(frame).unwrap();
        assert!(!db.mark_frame_detecting(frame).unwrap());
        assert!(!db.mark_frame_recognition_complete(frame).unwrap());
        assert_eq!(db.frame_status(frame).unwrap(), FrameStatus::Error);
    }

    struct BoundingBoxFixture;

    impl BoundingBoxFixture {
        fn bbox() -> crate::db::BoundingBox {
            crate::db::BoundingBox {
                x: 10,
                y: 10,
                width: 40,
                height: 40,
            }
        }
    }
}
