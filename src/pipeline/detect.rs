//! Face detection stage.
//!
//! Drains frames in `queued` or `detecting_faces`. Faces found above the
//! confidence threshold become `queued` detected_faces rows; a frame with
//! no faces completes recognition immediately. Detection failures stay at
//! frame granularity so one unreadable image never fails its clip.

use std::path::Path;

use anyhow::Result;

use crate::config::ProcessingConfig;
use crate::db::Database;
use crate::engine::FaceDetector;

use super::{CancelToken, StageOutcome};

pub fn run_detection(
    db: &Database,
    detector: &dyn FaceDetector,
    card_id: i64,
    config: &ProcessingConfig,
    cancel: &CancelToken,
) -> Result<StageOutcome> {
    let frames = db.frames_to_detect(card_id)?;
    let total = frames.len();

    for (index, frame) in frames.iter().enumerate() {
        if cancel.is_cancelled(db)? {
            tracing::info!(frame_id = frame.id, "Detection cancelled between frames");
            return Ok(StageOutcome::Cancelled);
        }

        if !db.mark_frame_detecting(frame.id)? {
            continue;
        }
        // A frame re-entering detection may carry partial rows from an
        // interrupted run.
        db.delete_faces_for_frame(frame.id)?;

        db.update_task_progress(
            cancel.task_id(),
            "detecting_faces",
            index as f64 / total.max(1) as f64,
            Some(&frame.timestamp),
        )?;

        match detector.detect(Path::new(&frame.raw_image_path), config.detection_confidence) {
            Ok(detections) if detections.is_empty() => {
                db.mark_frame_recognition_complete(frame.id)?;
                db.mark_clip_processing_complete_if_done(frame.clip_id)?;
            }
            Ok(detections) => {
                for detection in &detections {
                    db.insert_detected_face(frame.id, &detection.bbox, detection.confidence)?;
                }
                db.mark_frame_detection_complete(frame.id)?;
                tracing::debug!(
                    frame_id = frame.id,
                    faces = detections.len(),
                    "Faces detected"
                );
            }
            Err(e) => {
                tracing::error!(frame_id = frame.id, error = %e, "Detection failed");
                db.mark_frame_error(frame.id)?;
                db.mark_clip_processing_complete_if_done(frame.clip_id)?;
            }
        }
    }

    Ok(StageOutcome::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BoundingBox, ClipStatus, FaceStatus, FrameStatus};
    use crate::engine::{Detection, EngineError};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// Scripted detector: face count keyed by the image filename.
    struct FakeDetector;

    impl FaceDetector for FakeDetector {
        fn detect(
            &self,
            image_path: &Path,
            _confidence_threshold: f32,
        ) -> Result<Vec<Detection>, EngineError> {
            let name = image_path.to_string_lossy();
            if name.contains("corrupt") {
                return Err(EngineError::Detector("broken image".into()));
            }
            if name.contains("empty") {
                return Ok(Vec::new());
            }
            Ok(vec![
                Detection {
                    bbox: BoundingBox { x: 10, y: 10, width: 40, height: 40 },
                    confidence: 0.95,
                },
                Detection {
                    bbox: BoundingBox { x: 80, y: 20, width: 30, height: 35 },
                    confidence: 0.81,
                },
            ])
        }
    }

    fn fixture() -> (Database, i64, i64, CancelToken) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let project = db.create_project("p").unwrap();
        let card = db.create_card(project, "card").unwrap();
        let clip = db.insert_clip(card, None, "a.mp4", "/m/a.mp4").unwrap();
        db.set_clip_selection(clip, ClipStatus::Queued).unwrap();
        db.mark_clip_extracting(clip).unwrap();
        let task = db.create_task(card).unwrap();
        let token = CancelToken::new(task, Arc::new(AtomicBool::new(false)));
        (db, card, clip, token)
    }

    #[test]
    fn detection_routes_frames_by_face_count() {
        let (db, card, clip, cancel) = fixture();
        let with_faces = db.insert_frame(clip, "00:00:00:00", "/f/people.png").unwrap();
        let empty = db.insert_frame(clip, "00:00:01:00", "/f/empty.png").unwrap();
        let corrupt = db.insert_frame(clip, "00:00:02:00", "/f/corrupt.png").unwrap();
        db.mark_clip_extraction_complete(clip).unwrap();

        let outcome =
            run_detection(&db, &FakeDetector, card, &ProcessingConfig::default(), &cancel)
                .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);

        assert_eq!(
            db.frame_status(with_faces).unwrap(),
            FrameStatus::DetectionComplete
        );
        let faces = db.faces_for_frame(with_faces).unwrap();
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|f| f.status == FaceStatus::Queued));

        // No faces: recognition is already done.
        assert_eq!(
            db.frame_status(empty).unwrap(),
            FrameStatus::RecognitionComplete
        );
        assert_eq!(db.frame_status(corrupt).unwrap(), FrameStatus::Error);

        // Clip stays open: one frame still owes matching.
        assert_eq!(db.clip_status(clip).unwrap(), ClipStatus::ExtractionComplete);
    }

    #[test]
    fn all_empty_frames_complete_the_clip() {
        let (db, card, clip, cancel) = fixture();
        db.insert_frame(clip, "00:00:00:00", "/f/empty_a.png").unwrap();
        db.insert_frame(clip, "00:00:01:00", "/f/empty_b.png").unwrap();
        db.mark_clip_extraction_complete(clip).unwrap();

        run_detection(&db, &FakeDetector, card, &ProcessingConfig::default(), &cancel).unwrap();

        assert_eq!(db.clip_status(clip).unwrap(), ClipStatus::ProcessingComplete);
    }
}
