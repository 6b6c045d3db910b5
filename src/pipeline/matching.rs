//! Face matching stage and consent embedding refresh.
//!
//! Every detected face is compared against every consent face of the
//! project; every comparison at or below the distance threshold is recorded
//! as a match. Ambiguity (one face matching several people) is surfaced in
//! the data, not resolved here. When the last face of a frame settles, the
//! frame completes recognition and gets its review overlay rendered.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::ProcessingConfig;
use crate::db::{BoundingBox, ClipStatus, Database};
use crate::engine::FaceEmbedder;

use super::{CancelToken, StageOutcome};

/// One consent face ready for comparison.
#[derive(Debug, Clone)]
pub struct ConsentEntry {
    pub consent_face_id: i64,
    /// Full-image region of the reference photo, for match records.
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// Load the project's consent faces, regenerating any embedding that is
/// missing or older than its image file.
pub fn refresh_consent_embeddings(
    db: &Database,
    embedder: &dyn FaceEmbedder,
    project_id: i64,
) -> Result<Vec<ConsentEntry>> {
    let faces = db.consent_faces_for_project(project_id)?;
    let mut entries = Vec::with_capacity(faces.len());

    for face in faces {
        let path = Path::new(&face.image_path);
        let embedding = if consent_needs_refresh(path, face.last_updated.as_deref()) {
            tracing::info!(consent_face_id = face.id, image = %face.image_path, "Refreshing consent embedding");
            match embedder.embed(path, None) {
                Ok(embedding) => {
                    db.update_consent_embedding(face.id, &embedding)?;
                    embedding
                }
                Err(e) => match face.embedding.clone() {
                    // Keep the stale embedding rather than losing the person.
                    Some(cached) => {
                        tracing::warn!(
                            consent_face_id = face.id,
                            error = %e,
                            "Consent refresh failed, keeping cached embedding"
                        );
                        cached
                    }
                    None => {
                        tracing::warn!(
                            consent_face_id = face.id,
                            image = %face.image_path,
                            error = %e,
                            "Consent face unreadable, excluded from matching"
                        );
                        continue;
                    }
                },
            }
        } else {
            // needs_refresh is false only when an embedding exists.
            face.embedding.clone().unwrap_or_default()
        };

        let bbox = match image::image_dimensions(path) {
            Ok((w, h)) => BoundingBox {
                x: 0,
                y: 0,
                width: w as i32,
                height: h as i32,
            },
            Err(_) => BoundingBox {
                x: 0,
                y: 0,
                width: 0,
                height: 0,
            },
        };

        entries.push(ConsentEntry {
            consent_face_id: face.id,
            bbox,
            embedding,
        });
    }

    Ok(entries)
}

fn consent_needs_refresh(image_path: &Path, last_updated: Option<&str>) -> bool {
    let Some(last_updated) = last_updated else {
        return true;
    };
    let Ok(stamped) = DateTime::parse_from_rfc3339(last_updated) else {
        return true;
    };
    let modified = std::fs::metadata(image_path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    match modified {
        Some(mtime) => mtime > stamped.with_timezone(&Utc),
        // Unreadable file: keep the cached embedding.
        None => false,
    }
}

pub fn run_matching(
    db: &Database,
    embedder: &dyn FaceEmbedder,
    card_id: i64,
    consent: &[ConsentEntry],
    config: &ProcessingConfig,
    cancel: &CancelToken,
) -> Result<StageOutcome> {
    let faces = db.faces_to_match(card_id)?;
    let total = faces.len();

    for (index, face) in faces.iter().enumerate() {
        if cancel.is_cancelled(db)? {
            tracing::info!(face_id = face.id, "Matching cancelled between faces");
            return Ok(StageOutcome::Cancelled);
        }

        if !db.mark_face_matching(face.id)? {
            continue;
        }

        db.update_task_progress(
            cancel.task_id(),
            "matching_faces",
            index as f64 / total.max(1) as f64,
            None,
        )?;

        let frame_path = db.frame_raw_image_path(face.frame_id)?;
        let embedding = match &face.embedding {
            Some(existing) => Ok(existing.clone()),
            None => embedder.embed(Path::new(&frame_path), Some(&face.bbox)),
        };

        match embedding {
            Ok(embedding) => {
                if face.embedding.is_none() {
                    db.set_face_embedding(face.id, &embedding)?;
                }

                let metric = config.distance_metric;
                let threshold = config.match_threshold;
                let matches: Vec<(i64, f32, BoundingBox)> = consent
                    .par_iter()
                    .filter_map(|entry| {
                        let distance = metric.distance(&embedding, &entry.embedding);
                        // Threshold is inclusive.
                        (distance <= threshold)
                            .then_some((entry.consent_face_id, distance, entry.bbox))
                    })
                    .collect();

                for (consent_face_id, distance, target_bbox) in &matches {
                    db.insert_face_match(
                        face.id,
                        *consent_face_id,
                        *distance as f64,
                        threshold as f64,
                        &face.bbox,
                        target_bbox,
                    )?;
                }
                tracing::debug!(face_id = face.id, matches = matches.len(), "Face matched");
                db.mark_face_matching_complete(face.id)?;
            }
            Err(e) => {
                tracing::error!(face_id = face.id, error = %e, "Embedding failed");
                db.mark_face_error(face.id)?;
            }
        }

        finalize_frame_if_done(db, face.frame_id)?;
    }

    Ok(StageOutcome::Finished)
}

/// Settle rollups an interrupted run left behind: frames whose faces all
/// went terminal without the frame completing, and clips likewise. A crash
/// between a child's terminal update and the parent aggregation otherwise
/// strands the parent, since the resumed run finds no pending child to
/// trigger the rollup again.
pub fn reconcile_card_completion(db: &Database, card_id: i64) -> Result<()> {
    for frame_id in db.frames_awaiting_rollup(card_id)? {
        finalize_frame_if_done(db, frame_id)?;
    }
    for clip_id in db.clip_ids_with_status(card_id, ClipStatus::ExtractionComplete)? {
        db.mark_clip_processing_complete_if_done(clip_id)?;
    }
    Ok(())
}

/// Complete the frame once all of its faces are terminal, render the review
/// overlay and roll the completion up to the clip.
fn finalize_frame_if_done(db: &Database, frame_id: i64) -> Result<()> {
    if !db.mark_frame_recognition_complete_if_done(frame_id)? {
        return Ok(());
    }

    let raw_path = db.frame_raw_image_path(frame_id)?;
    match render_overlay(db, frame_id, Path::new(&raw_path)) {
        Ok(processed) => {
            db.set_frame_processed_image(frame_id, &processed.to_string_lossy())?;
        }
        // The overlay is a review aid; its failure never regresses the frame.
        Err(e) => {
            tracing::warn!(frame_id, error = %e, "Overlay rendering failed");
        }
    }

    let clip_id = db.frame_clip_id(frame_id)?;
    db.mark_clip_processing_complete_if_done(clip_id)?;
    Ok(())
}

const MATCHED_COLOR: image::Rgb<u8> = image::Rgb([0, 220, 0]);
const UNMATCHED_COLOR: image::Rgb<u8> = image::Rgb([220, 0, 0]);
const BORDER_PX: i32 = 3;

/// Draw a colored box around every face: green for consented, red for
/// unknown. Written next to the raw frame under a `processed/` directory.
fn render_overlay(db: &Database, frame_id: i64, raw_path: &Path) -> Result<PathBuf> {
    let mut img = image::open(raw_path)
        .with_context(|| format!("loading frame image {}", raw_path.display()))?
        .to_rgb8();

    for face in db.faces_for_frame(frame_id)? {
        let color = if db.detection_has_match(face.id)? {
            MATCHED_COLOR
        } else {
            UNMATCHED_COLOR
        };
        draw_box(&mut img, &face.bbox, color);
    }

    let parent = raw_path.parent().unwrap_or_else(|| Path::new("."));
    let processed_dir = parent.join("processed");
    std::fs::create_dir_all(&processed_dir)?;
    let file_name = raw_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| format!("frame_{frame_id}.png").into());
    let out_path = processed_dir.join(file_name);
    img.save(&out_path)
        .with_context(|| format!("saving overlay {}", out_path.display()))?;
    Ok(out_path)
}

fn draw_box(img: &mut image::RgbImage, bbox: &BoundingBox, color: image::Rgb<u8>) {
    let (width, height) = (img.width() as i32, img.height() as i32);
    let x0 = bbox.x;
    let y0 = bbox.y;
    let x1 = bbox.x + bbox.width;
    let y1 = bbox.y + bbox.height;

    for y in y0..y1 {
        for x in x0..x1 {
            let on_border = x - x0 < BORDER_PX
                || x1 - x <= BORDER_PX
                || y - y0 < BORDER_PX
                || y1 - y <= BORDER_PX;
            if on_border && x >= 0 && y >= 0 && x < width && y < height {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
