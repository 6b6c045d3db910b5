//! Consent profiles and reference faces.
//!
//! Consent face embeddings are regenerated lazily: a face whose image file
//! changed after `last_updated` gets re-embedded at the start of the next
//! processing run.

use anyhow::Result;
use rusqlite::params;

use super::faces::{bytes_to_embedding, embedding_to_bytes};
use super::Database;

#[derive(Debug, Clone)]
pub struct ConsentFaceRecord {
    pub id: i64,
    pub profile_id: i64,
    pub image_path: String,
    pub pose_type: String,
    pub embedding: Option<Vec<f32>>,
    pub last_updated: Option<String>,
}

impl Database {
    pub fn create_consent_profile(&self, project_id: i64, person_name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO consent_profiles (project_id, person_name) VALUES (?, ?)",
            params![project_id, person_name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_consent_face(
        &self,
        profile_id: i64,
        image_path: &str,
        pose_type: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO consent_faces (profile_id, image_path, pose_type) VALUES (?, ?, ?)",
            params![profile_id, image_path, pose_type],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every consent face in the project, across all of its profiles.
    pub fn consent_faces_for_project(&self, project_id: i64) -> Result<Vec<ConsentFaceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT cf.id, cf.profile_id, cf.image_path, cf.pose_type, cf.embedding, cf.last_updated
            FROM consent_faces cf
            JOIN consent_profiles cp ON cp.id = cf.profile_id
            WHERE cp.project_id = ?
            ORDER BY cf.id
            "#,
        )?;
        let rows = stmt
            .query_map([project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<Vec<u8>>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|raw| {
                let embedding = match raw.4 {
                    Some(bytes) => Some(bytes_to_embedding(&bytes)?),
                    None => None,
                };
                Ok(ConsentFaceRecord {
                    id: raw.0,
                    profile_id: raw.1,
                    image_path: raw.2,
                    pose_type: raw.3,
                    embedding,
                    last_updated: raw.5,
                })
            })
            .collect()
    }

    pub fn update_consent_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE consent_faces SET embedding = ?, embedding_dim = ?, last_updated = ? \
             WHERE id = ?",
            params![
                embedding_to_bytes(embedding),
                embedding.len() as i64,
                now,
                id
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_faces_scope_to_project() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let p1 = db.create_project("one").unwrap();
        let p2 = db.create_project("two").unwrap();
        let prof1 = db.create_consent_profile(p1, "Alice").unwrap();
        let prof2 = db.create_consent_profile(p2, "Bob").unwrap();
        db.insert_consent_face(prof1, "/c/alice.jpg", "frontal").unwrap();
        db.insert_consent_face(prof1, "/c/alice_left.jpg", "left").unwrap();
        db.insert_consent_face(prof2, "/c/bob.jpg", "frontal").unwrap();

        let faces = db.consent_faces_for_project(p1).unwrap();
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|f| f.embedding.is_none()));
        assert!(faces.iter().all(|f| f.last_updated.is_none()));
    }

    #[test]
    fn embedding_update_stamps_last_updated() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let profile = db.create_consent_profile(project, "Alice").unwrap();
        let face = db.insert_consent_face(profile, "/c/a.jpg", "frontal").unwrap();

        db.update_consent_embedding(face, &[1.0, 0.0]).unwrap();
        let faces = db.consent_faces_for_project(project).unwrap();
        assert_eq!(faces[0].embedding.as_deref(), Some(&[1.0f32, 0.0][..]));
        assert!(faces[0].last_updated.is_some());
    }
}
