//! Watch folder rows and status transitions.

use anyhow::Result;
use rusqlite::params;

use super::status::WatchFolderStatus;
use super::Database;

#[derive(Debug, Clone)]
pub struct WatchFolderRecord {
    pub id: i64,
    pub config_id: i64,
    pub folder_path: String,
    pub status: WatchFolderStatus,
}

impl Database {
    pub fn create_watch_folder(&self, config_id: i64, folder_path: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO watch_folders (config_id, folder_path) VALUES (?, ?)",
            params![config_id, folder_path],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_watch_folder(&self, id: i64) -> Result<Option<WatchFolderRecord>> {
        let result = self.conn.query_row(
            "SELECT id, config_id, folder_path, status FROM watch_folders WHERE id = ?",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );
        match result {
            Ok((id, config_id, folder_path, status)) => Ok(Some(WatchFolderRecord {
                id,
                config_id,
                folder_path,
                status: status.parse()?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_watch_folder_status(&self, id: i64, status: WatchFolderStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE watch_folders SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    /// Move a folder to `scanned` after a one-shot scan, unless a monitor
    /// currently owns it (`active`).
    pub fn mark_watch_folder_scanned(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE watch_folders SET status = 'scanned' WHERE id = ? AND status != 'active'",
            [id],
        )?;
        Ok(())
    }

    /// Resolve the card owning a watch folder via its card config.
    pub fn card_id_for_watch_folder(&self, watch_folder_id: i64) -> Result<Option<i64>> {
        let result = self.conn.query_row(
            r#"
            SELECT cc.card_id
            FROM watch_folders wf
            JOIN card_configs cc ON cc.id = wf.config_id
            WHERE wf.id = ?
            "#,
            [watch_folder_id],
            |row| row.get(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
