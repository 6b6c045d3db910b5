//! Watch folder scanning: discover video files and reconcile them into clip
//! rows.
//!
//! Reconciliation is keyed on (card, filename). A path already known is
//! refreshed in place, a colliding filename from a different location is
//! skipped and reported, and only genuinely new files become clips.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::db::{Database, WatchFolderStatus};

#[derive(Debug, Default)]
pub struct ScanResult {
    pub found: usize,
    pub created: usize,
    pub updated: usize,
    /// Filenames skipped because another clip on the card already claims
    /// them.
    pub duplicates_skipped: Vec<String>,
    /// Files that could not be reconciled (unreadable names, I/O faults).
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reconciliation {
    Created(i64),
    Updated(i64),
    DuplicateFilename,
}

/// Recursively list video files under a directory, sorted by path so scan
/// order is stable across runs.
pub fn discover_videos(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_lowercase();
            if extensions.iter().any(|e| e == &ext) {
                videos.push(path.to_path_buf());
            }
        }
    }

    videos.sort();
    Ok(videos)
}

/// Fold one discovered file into the clip table.
pub fn reconcile_file(
    db: &Database,
    card_id: i64,
    watch_folder_id: Option<i64>,
    path: &Path,
) -> Result<Reconciliation> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("unreadable filename: {}", path.display()))?;
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF8 path: {}", path.display()))?;

    match db.find_clip_by_filename(card_id, filename)? {
        Some(existing) if existing.path == path_str => {
            db.update_clip_path(existing.id, path_str)?;
            Ok(Reconciliation::Updated(existing.id))
        }
        Some(existing) => {
            tracing::warn!(
                filename,
                existing = %existing.path,
                incoming = %path.display(),
                "Duplicate filename on card, skipping"
            );
            Ok(Reconciliation::DuplicateFilename)
        }
        None => {
            let id = db.insert_clip(card_id, watch_folder_id, filename, path_str)?;
            Ok(Reconciliation::Created(id))
        }
    }
}

/// One-shot scan of a watch folder. Idempotent: re-running over an
/// unchanged directory creates nothing new.
pub fn scan_watch_folder(
    db: &Database,
    watch_folder_id: i64,
    extensions: &[String],
) -> Result<ScanResult> {
    let folder = db
        .get_watch_folder(watch_folder_id)?
        .ok_or_else(|| anyhow!("watch folder {watch_folder_id} not found"))?;
    let card_id = db
        .card_id_for_watch_folder(watch_folder_id)?
        .ok_or_else(|| anyhow!("watch folder {watch_folder_id} has no card"))?;

    let dir = PathBuf::from(&folder.folder_path);
    let videos = match discover_videos(&dir, extensions) {
        Ok(v) => v,
        Err(e) => {
            db.set_watch_folder_status(watch_folder_id, WatchFolderStatus::Error)?;
            return Err(e);
        }
    };

    let mut result = ScanResult {
        found: videos.len(),
        ..Default::default()
    };

    for path in &videos {
        match reconcile_file(db, card_id, Some(watch_folder_id), path) {
            Ok(Reconciliation::Created(_)) => result.created += 1,
            Ok(Reconciliation::Updated(_)) => result.updated += 1,
            Ok(Reconciliation::DuplicateFilename) => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    result.duplicates_skipped.push(name.to_string());
                }
            }
            // One bad file never aborts the scan of its siblings.
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                result.failed += 1;
            }
        }
    }

    db.mark_watch_folder_scanned(watch_folder_id)?;

    tracing::info!(
        folder = %folder.folder_path,
        found = result.found,
        created = result.created,
        updated = result.updated,
        skipped = result.duplicates_skipped.len(),
        "Scan complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ClipStatus;
    use std::fs;

    fn fixture(dir: &Path) -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        let config = db.create_card_config(card).unwrap();
        let folder = db
            .create_watch_folder(config, dir.to_str().unwrap())
            .unwrap();
        (db, card, folder)
    }

    fn exts() -> Vec<String> {
        vec!["mp4".into(), "mov".into()]
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("b.mp4"), b"x").unwrap();
        fs::write(tmp.path().join("sub/a.MOV"), b"x").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let videos = discover_videos(tmp.path(), &exts()).unwrap();
        assert_eq!(videos.len(), 2);
        assert!(videos[0].ends_with("b.mp4"));
        assert!(videos[1].ends_with("sub/a.MOV"));
    }

    #[test]
    fn rescan_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.mp4"), b"x").unwrap();
        let (db, card, folder) = fixture(tmp.path());

        let first = scan_watch_folder(&db, folder, &exts()).unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.updated, 0);

        let second = scan_watch_folder(&db, folder, &exts()).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(db.count_clips_for_card(card).unwrap(), 1);
    }

    #[test]
    fn duplicate_filename_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("one")).unwrap();
        fs::create_dir(tmp.path().join("two")).unwrap();
        fs::write(tmp.path().join("one/clip.mp4"), b"x").unwrap();
        fs::write(tmp.path().join("two/clip.mp4"), b"x").unwrap();
        let (db, card, folder) = fixture(tmp.path());

        let result = scan_watch_folder(&db, folder, &exts()).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.duplicates_skipped, vec!["clip.mp4".to_string()]);
        assert_eq!(db.count_clips_for_card(card).unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_filename_is_skipped_not_fatal() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("good.mp4"), b"x").unwrap();
        let bad = OsString::from_vec(b"bad\xff.mp4".to_vec());
        fs::write(tmp.path().join(bad), b"x").unwrap();
        let (db, card, folder) = fixture(tmp.path());

        let result = scan_watch_folder(&db, folder, &exts()).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(db.count_clips_for_card(card).unwrap(), 1);
    }

    #[test]
    fn new_clips_start_pending() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.mp4"), b"x").unwrap();
        let (db, card, folder) = fixture(tmp.path());
        scan_watch_folder(&db, folder, &exts()).unwrap();

        let clip = db.find_clip_by_filename(card, "a.mp4").unwrap().unwrap();
        assert_eq!(clip.status, ClipStatus::Pending);
        assert_eq!(clip.watch_folder_id, Some(folder));
    }
}
