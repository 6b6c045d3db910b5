//! Frame extraction stage.
//!
//! Drains clips in `queued` or `extracting_frames`, samples frames through
//! the configured sampler and records them as `queued` frame rows. A clip
//! found mid-extraction has its partial frame set discarded and is
//! re-extracted from scratch, which keeps the frame list consistent with a
//! single sampler invocation.

use std::path::Path;

use anyhow::Result;

use crate::config::ProcessingConfig;
use crate::db::Database;
use crate::engine::FrameSampler;

use super::{CancelToken, StageOutcome};

pub fn run_extraction(
    db: &Database,
    sampler: &dyn FrameSampler,
    card_id: i64,
    frames_root: &Path,
    config: &ProcessingConfig,
    cancel: &CancelToken,
) -> Result<StageOutcome> {
    let clips = db.clips_to_extract(card_id)?;
    let total = clips.len();

    for (index, clip) in clips.iter().enumerate() {
        if cancel.is_cancelled(db)? {
            tracing::info!(clip_id = clip.id, "Extraction cancelled between clips");
            return Ok(StageOutcome::Cancelled);
        }

        if !db.mark_clip_extracting(clip.id)? {
            // Someone else moved the clip on; skip it.
            continue;
        }

        db.update_task_progress(
            cancel.task_id(),
            "extracting_frames",
            index as f64 / total.max(1) as f64,
            Some(&clip.filename),
        )?;

        let out_dir = frames_root.join(format!("clip_{}", clip.id));
        let result = sampler.extract(
            Path::new(&clip.path),
            &out_dir,
            config.sample_rate_fps,
            &config.color_transform,
        );

        match result {
            Ok(frames) => {
                // Replace any partial frame set from an interrupted run.
                db.delete_frames_for_clip(clip.id)?;
                for frame in &frames {
                    db.insert_frame(
                        clip.id,
                        &frame.timecode,
                        &frame.image_path.to_string_lossy(),
                    )?;
                }
                db.mark_clip_extraction_complete(clip.id)?;
                tracing::info!(
                    clip_id = clip.id,
                    filename = %clip.filename,
                    frames = frames.len(),
                    "Frames extracted"
                );
            }
            Err(e) => {
                tracing::error!(clip_id = clip.id, error = %e, "Extraction failed");
                db.mark_clip_error(clip.id, &e.to_string())?;
            }
        }
    }

    Ok(StageOutcome::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColorTransform;
    use crate::db::{ClipStatus, FrameStatus};
    use crate::engine::{EngineError, SampledFrame};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// Scripted sampler: yields a fixed number of frames, or fails for
    /// clips whose filename contains "bad".
    struct FakeSampler {
        frames_per_clip: usize,
    }

    impl FrameSampler for FakeSampler {
        fn extract(
            &self,
            clip_path: &Path,
            out_dir: &Path,
            _sample_rate_fps: f64,
            _transform: &ColorTransform,
        ) -> Result<Vec<SampledFrame>, EngineError> {
            if clip_path.to_string_lossy().contains("bad") {
                return Err(EngineError::Decode("unreadable container".into()));
            }
            Ok((0..self.frames_per_clip)
                .map(|i| SampledFrame {
                    timecode: format!("00:00:{:02}:00", i),
                    image_path: out_dir.join(format!("frame_{:06}.png", i + 1)),
                })
                .collect())
        }
    }

    fn fixture() -> (Database, i64, CancelToken) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        let task = db.create_task(card).unwrap();
        let token = CancelToken::new(task, Arc::new(AtomicBool::new(false)));
        (db, card, token)
    }

    #[test]
    fn extraction_drains_queued_clips() {
        let (db, card, cancel) = fixture();
        let good = db.insert_clip(card, None, "a.mp4", "/m/a.mp4").unwrap();
        let bad = db.insert_clip(card, None, "bad.mp4", "/m/bad.mp4").unwrap();
        let unselected = db.insert_clip(card, None, "c.mp4", "/m/c.mp4").unwrap();
        db.set_clip_selection(good, ClipStatus::Queued).unwrap();
        db.set_clip_selection(bad, ClipStatus::Queued).unwrap();

        let sampler = FakeSampler { frames_per_clip: 3 };
        let outcome = run_extraction(
            &db,
            &sampler,
            card,
            &PathBuf::from("/tmp/frames"),
            &ProcessingConfig::default(),
            &cancel,
        )
        .unwrap();

        assert_eq!(outcome, StageOutcome::Finished);
        assert_eq!(db.clip_status(good).unwrap(), ClipStatus::ExtractionComplete);
        assert_eq!(db.count_frames_for_clip(good).unwrap(), 3);
        assert_eq!(db.clip_status(bad).unwrap(), ClipStatus::Error);
        assert_eq!(db.count_frames_for_clip(bad).unwrap(), 0);
        assert_eq!(db.clip_status(unselected).unwrap(), ClipStatus::Pending);

        let frames = db.frames_to_detect(card).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.status == FrameStatus::Queued));
    }

    #[test]
    fn interrupted_clip_is_reextracted_without_duplicates() {
        let (db, card, cancel) = fixture();
        let clip = db.insert_clip(card, None, "a.mp4", "/m/a.mp4").unwrap();
        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();

        // Simulate a crash: clip marked extracting with a partial frame set.
        db.mark_clip_extracting(clip).unwrap();
        db.insert_frame(clip, "00:00:00:00", "/old/frame_1.png").unwrap();

        let sampler = FakeSampler { frames_per_clip: 2 };
        run_extraction(
            &db,
            &sampler,
            card,
            &PathBuf::from("/tmp/frames"),
            &ProcessingConfig::default(),
            &cancel,
        )
        .unwrap();

        assert_eq!(db.clip_status(clip).unwrap(), ClipStatus::ExtractionComplete);
        assert_eq!(db.count_frames_for_clip(clip).unwrap(), 2);
    }

    #[test]
    fn cancel_stops_between_clips() {
        let (db, card, _) = fixture();
        let c1 = db.insert_clip(card, None, "a.mp4", "/m/a.mp4").unwrap();
        db.set_clip_selection(c1, ClipStatus::Queued).unwrap();

        // Token whose flag is already tripped.
        let task = db.create_task(card).unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let cancel = CancelToken::new(task, flag);

        let sampler = FakeSampler { frames_per_clip: 1 };
        let outcome = run_extraction(
            &db,
            &sampler,
            card,
            &PathBuf::from("/tmp/frames"),
            &ProcessingConfig::default(),
            &cancel,
        )
        .unwrap();

        assert_eq!(outcome, StageOutcome::Cancelled);
        assert_eq!(db.clip_status(c1).unwrap(), ClipStatus::Queued);
    }
}
