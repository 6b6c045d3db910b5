//! Detected faces and their consent matches.
//!
//! Embeddings are stored as little-endian f32 blobs next to their dimension,
//! so a model change is detectable without decoding the blob.

use anyhow::Result;
use rusqlite::params;

use super::status::FaceStatus;
use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone)]
pub struct DetectedFaceRecord {
    pub id: i64,
    pub frame_id: i64,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub embedding: Option<Vec<f32>>,
    pub status: FaceStatus,
}

#[derive(Debug, Clone)]
pub struct FaceMatchRecord {
    pub id: i64,
    pub detection_id: i64,
    pub consent_face_id: i64,
    pub distance: f64,
    pub threshold: f64,
    pub source_bbox: BoundingBox,
    pub target_bbox: BoundingBox,
}

pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("embedding blob length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl Database {
    pub fn insert_detected_face(
        &self,
        frame_id: i64,
        bbox: &BoundingBox,
        confidence: f32,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO detected_faces \
             (frame_id, confidence, bbox_x, bbox_y, bbox_w, bbox_h, status) \
             VALUES (?, ?, ?, ?, ?, ?, 'queued')",
            params![frame_id, confidence, bbox.x, bbox.y, bbox.width, bbox.height],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Drop all faces of a frame. Used when detection re-runs over a frame
    /// that crashed mid-insert.
    pub fn delete_faces_for_frame(&self, frame_id: i64) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM detected_faces WHERE frame_id = ?", [frame_id])?;
        Ok(deleted)
    }

    /// Faces still owed a matching pass across all frames of a card.
    pub fn faces_to_match(&self, card_id: i64) -> Result<Vec<DetectedFaceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.id, d.frame_id, d.confidence, d.bbox_x, d.bbox_y, d.bbox_w, d.bbox_h,
                   d.embedding, d.status
            FROM detected_faces d
            JOIN frames f ON f.id = d.frame_id
            JOIN clips c ON c.id = f.clip_id
            WHERE c.card_id = ? AND d.status IN ('queued', 'matching_faces')
            ORDER BY d.frame_id, d.id
            "#,
        )?;
        let rows = stmt
            .query_map([card_id], row_to_face_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(build_face).collect()
    }

    pub fn count_faces_to_match(&self, card_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM detected_faces d
            JOIN frames f ON f.id = d.frame_id
            JOIN clips c ON c.id = f.clip_id
            WHERE c.card_id = ? AND d.status IN ('queued', 'matching_faces')
            "#,
            [card_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn faces_for_frame(&self, frame_id: i64) -> Result<Vec<DetectedFaceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, frame_id, confidence, bbox_x, bbox_y, bbox_w, bbox_h, embedding, status \
             FROM detected_faces WHERE frame_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map([frame_id], row_to_face_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(build_face).collect()
    }

    pub fn mark_face_matching(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE detected_faces SET status = 'matching_faces' \
             WHERE id = ? AND status IN ('queued', 'matching_faces')",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_face_matching_complete(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE detected_faces SET status = 'matching_complete' \
             WHERE id = ? AND status = 'matching_faces'",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_face_error(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE detected_faces SET status = 'error' \
             WHERE id = ? AND status IN ('queued', 'matching_faces')",
            [id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_face_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        self.conn.execute(
            "UPDATE detected_faces SET embedding = ?, embedding_dim = ? WHERE id = ?",
            params![embedding_to_bytes(embedding), embedding.len() as i64, id],
        )?;
        Ok(())
    }

    pub fn insert_face_match(
        &self,
        detection_id: i64,
        consent_face_id: i64,
        distance: f64,
        threshold: f64,
        source_bbox: &BoundingBox,
        target_bbox: &BoundingBox,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO face_matches
            (detection_id, consent_face_id, distance, threshold,
             source_x, source_y, source_w, source_h,
             target_x, target_y, target_w, target_h)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                detection_id,
                consent_face_id,
                distance,
                threshold,
                source_bbox.x,
                source_bbox.y,
                source_bbox.width,
                source_bbox.height,
                target_bbox.x,
                target_bbox.y,
                target_bbox.width,
                target_bbox.height,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn matches_for_detection(&self, detection_id: i64) -> Result<Vec<FaceMatchRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, detection_id, consent_face_id, distance, threshold,
                   source_x, source_y, source_w, source_h,
                   target_x, target_y, target_w, target_h
            FROM face_matches WHERE detection_id = ? ORDER BY distance
            "#,
        )?;
        let rows = stmt
            .query_map([detection_id], |row| {
                Ok(FaceMatchRecord {
                    id: row.get(0)?,
                    detection_id: row.get(1)?,
                    consent_face_id: row.get(2)?,
                    distance: row.get(3)?,
                    threshold: row.get(4)?,
                    source_bbox: BoundingBox {
                        x: row.get(5)?,
                        y: row.get(6)?,
                        width: row.get(7)?,
                        height: row.get(8)?,
                    },
                    target_bbox: BoundingBox {
                        x: row.get(9)?,
                        y: row.get(10)?,
                        width: row.get(11)?,
                        height: row.get(12)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Whether a detection has at least one recorded consent match. Drives
    /// the overlay color.
    pub fn detection_has_match(&self, detection_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM face_matches WHERE detection_id = ?",
            [detection_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

type FaceRaw = (
    i64,
    i64,
    f64,
    i32,
    i32,
    i32,
    i32,
    Option<Vec<u8>>,
    String,
);

fn row_to_face_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceRaw> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn build_face(raw: FaceRaw) -> Result<DetectedFaceRecord> {
    let embedding = match raw.7 {
        Some(bytes) => Some(bytes_to_embedding(&bytes)?),
        None => None,
    };
    Ok(DetectedFaceRecord {
        id: raw.0,
        frame_id: raw.1,
        confidence: raw.2 as f32,
        bbox: BoundingBox {
            x: raw.3,
            y: raw.4,
            width: raw.5,
            height: raw.6,
        },
        embedding,
        status: raw.8.parse()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::status::ClipStatus;

    fn frame_fixture() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        let clip = db.insert_clip(card, None, "a.mp4", "/media/a.mp4").unwrap();
        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();
        let frame = db.insert_frame(clip, "00:00:00:00", "/f/0.png").unwrap();
        (db, frame)
    }

    fn bbox() -> BoundingBox {
        BoundingBox {
            x: 5,
            y: 7,
            width: 30,
            height: 32,
        }
    }

    #[test]
    fn embedding_blob_round_trips() {
        let original = vec![0.25f32, -1.5, 3.125, 0.0];
        let restored = bytes_to_embedding(&embedding_to_bytes(&original)).unwrap();
        assert_eq!(restored, original);
        assert!(bytes_to_embedding(&[1, 2, 3]).is_err());
    }

    #[test]
    fn face_status_moves_forward_only() {
        let (db, frame) = frame_fixture();
        let face = db.insert_detected_face(frame, &bbox(), 0.92).unwrap();

        assert!(db.mark_face_matching(face).unwrap());
        // Resumption may re-enter the in-flight state.
        assert!(db.mark_face_matching(face).unwrap());
        assert!(db.mark_face_matching_complete(face).unwrap());
        assert!(!db.mark_face_matching(face).unwrap());
        assert!(!db.mark_face_error(face).unwrap());
    }

    #[test]
    fn embedding_and_matches_persist() {
        let (db, frame) = frame_fixture();
        let face = db.insert_detected_face(frame, &bbox(), 0.88).unwrap();
        db.set_face_embedding(face, &[0.1, 0.2, 0.3]).unwrap();

        let loaded = db.faces_for_frame(frame).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].embedding.as_deref(), Some(&[0.1f32, 0.2, 0.3][..]));
        assert_eq!(loaded[0].bbox, bbox());

        let project = db.project_id_for_card(1).unwrap().unwrap();
        let profile = db.create_consent_profile(project, "Alice").unwrap();
        let consent = db
            .insert_consent_face(profile, "/consent/alice.jpg", "frontal")
            .unwrap();

        assert!(!db.detection_has_match(face).unwrap());
        db.insert_face_match(face, consent, 0.31, 0.68, &bbox(), &bbox())
            .unwrap();
        assert!(db.detection_has_match(face).unwrap());
        let matches = db.matches_for_detection(face).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].consent_face_id, consent);
        assert!((matches[0].distance - 0.31).abs() < 1e-9);
    }
}
