//! Active watch folder monitoring.
//!
//! One thread per monitored folder polls the directory, reconciles new
//! video files into clips and winds itself down after a configurable
//! stretch of inactivity. Files already present when the monitor starts
//! are snapshotted first so only genuinely new arrivals create clips.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::db::{Database, WatchFolderStatus};
use crate::scanner::{discover_videos, reconcile_file, Reconciliation};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub inactivity_timeout: Duration,
    pub video_extensions: Vec<String>,
}

struct MonitorHandle {
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Tracks the live monitor thread per watch folder. Starting a folder that
/// already has a live monitor is a no-op.
pub struct MonitorRegistry {
    db_path: PathBuf,
    monitors: Mutex<HashMap<i64, MonitorHandle>>,
}

impl MonitorRegistry {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Start monitoring a watch folder. Returns false when a monitor for
    /// the folder is already live.
    pub fn start(&self, watch_folder_id: i64, settings: MonitorSettings) -> Result<bool> {
        let mut monitors = self
            .monitors
            .lock()
            .map_err(|_| anyhow!("monitor registry lock poisoned"))?;

        if let Some(existing) = monitors.get(&watch_folder_id) {
            if existing.running.load(Ordering::SeqCst) {
                return Ok(false);
            }
            // Previous thread already wound down; reap it.
            if let Some(stale) = monitors.remove(&watch_folder_id) {
                let _ = stale.handle.join();
            }
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let db_path = self.db_path.clone();
        let thread_stop = stop_flag.clone();
        let thread_running = running.clone();

        let handle = std::thread::spawn(move || {
            if let Err(e) = monitor_loop(&db_path, watch_folder_id, &settings, &thread_stop) {
                tracing::error!(watch_folder_id, error = %e, "Monitor failed");
                if let Ok(db) = Database::open(&db_path) {
                    let _ = db.set_watch_folder_status(watch_folder_id, WatchFolderStatus::Error);
                }
            }
            thread_running.store(false, Ordering::SeqCst);
        });

        monitors.insert(
            watch_folder_id,
            MonitorHandle {
                stop_flag,
                running,
                handle,
            },
        );
        Ok(true)
    }

    pub fn is_running(&self, watch_folder_id: i64) -> bool {
        self.monitors
            .lock()
            .ok()
            .and_then(|m| {
                m.get(&watch_folder_id)
                    .map(|h| h.running.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }

    /// Stop one monitor and wait for its thread to exit.
    pub fn stop(&self, watch_folder_id: i64) -> Result<bool> {
        let handle = {
            let mut monitors = self
                .monitors
                .lock()
                .map_err(|_| anyhow!("monitor registry lock poisoned"))?;
            monitors.remove(&watch_folder_id)
        };
        match handle {
            Some(h) => {
                h.stop_flag.store(true, Ordering::SeqCst);
                h.handle
                    .join()
                    .map_err(|_| anyhow!("monitor thread panicked"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop every live monitor. Used on shutdown.
    pub fn stop_all(&self) -> Result<()> {
        let handles: Vec<(i64, MonitorHandle)> = {
            let mut monitors = self
                .monitors
                .lock()
                .map_err(|_| anyhow!("monitor registry lock poisoned"))?;
            monitors.drain().collect()
        };
        for (id, h) in handles {
            h.stop_flag.store(true, Ordering::SeqCst);
            if h.handle.join().is_err() {
                tracing::error!(watch_folder_id = id, "Monitor thread panicked on shutdown");
            }
        }
        Ok(())
    }
}

fn monitor_loop(
    db_path: &Path,
    watch_folder_id: i64,
    settings: &MonitorSettings,
    stop_flag: &AtomicBool,
) -> Result<()> {
    let db = Database::open(db_path)?;
    let folder = db
        .get_watch_folder(watch_folder_id)?
        .ok_or_else(|| anyhow!("watch folder {watch_folder_id} not found"))?;
    let card_id = db
        .card_id_for_watch_folder(watch_folder_id)?
        .ok_or_else(|| anyhow!("watch folder {watch_folder_id} has no card"))?;
    let dir = PathBuf::from(&folder.folder_path);

    db.set_watch_folder_status(watch_folder_id, WatchFolderStatus::Active)?;
    tracing::info!(watch_folder_id, folder = %folder.folder_path, "Monitor started");

    // Snapshot what already exists; those files belong to a manual scan.
    let mut known: HashSet<PathBuf> = discover_videos(&dir, &settings.video_extensions)?
        .into_iter()
        .collect();

    let mut last_activity = Instant::now();

    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(settings.poll_interval);
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        let current = discover_videos(&dir, &settings.video_extensions)?;
        for path in current {
            if known.contains(&path) {
                continue;
            }
            known.insert(path.clone());
            last_activity = Instant::now();
            match reconcile_file(&db, card_id, Some(watch_folder_id), &path) {
                Ok(Reconciliation::Created(id)) => {
                    tracing::info!(clip_id = id, path = %path.display(), "New clip from monitor");
                }
                Ok(Reconciliation::Updated(id)) => {
                    tracing::debug!(clip_id = id, "Known clip reappeared");
                }
                Ok(Reconciliation::DuplicateFilename) => {}
                // One bad file must not take the whole monitor down.
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                }
            }
        }

        if last_activity.elapsed() >= settings.inactivity_timeout {
            tracing::info!(watch_folder_id, "Monitor idle timeout reached");
            break;
        }
    }

    db.set_watch_folder_status(watch_folder_id, WatchFolderStatus::Idle)?;
    tracing::info!(watch_folder_id, "Monitor stopped");
    Ok(())
}
