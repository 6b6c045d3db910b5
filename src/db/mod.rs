mod schema;
pub mod clips;
pub mod consent;
pub mod faces;
pub mod frames;
pub mod status;
pub mod tasks;
pub mod watch_folders;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use clips::ClipRecord;
pub use consent::ConsentFaceRecord;
pub use faces::{BoundingBox, DetectedFaceRecord, FaceMatchRecord};
pub use frames::FrameRecord;
pub use schema::{MIGRATIONS, SCHEMA};
pub use status::{ClipStatus, FaceStatus, FrameStatus, TaskStatus, WatchFolderStatus};
pub use tasks::ProcessingTaskRecord;
pub use watch_folders::WatchFolderRecord;

/// Database handle. Owns a single SQLite connection; the worker thread, the
/// monitors and the CLI each open their own handle against the same file.
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // Cross-process readers (CLI status, monitors) share the file.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    // ========================================================================
    // Project / card context (the surrounding CRUD layer owns these; the
    // pipeline needs create for tests and read for card -> project lookup)
    // ========================================================================

    pub fn create_project(&self, name: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO projects (name) VALUES (?)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn create_card(&self, project_id: i64, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cards (project_id, name) VALUES (?, ?)",
            rusqlite::params![project_id, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn create_card_config(&self, card_id: i64) -> Result<i64> {
        self.conn
            .execute("INSERT INTO card_configs (card_id) VALUES (?)", [card_id])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn project_id_for_card(&self, card_id: i64) -> Result<Option<i64>> {
        let result = self.conn.query_row(
            "SELECT project_id FROM cards WHERE id = ?",
            [card_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
