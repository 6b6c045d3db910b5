//! Media engine seams: frame sampling, face detection, face embedding.
//!
//! The pipeline depends only on these traits; the production implementations
//! live in [`ffmpeg`] and [`onnx`], and tests substitute scripted engines.

pub mod ffmpeg;
pub mod onnx;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ColorTransform;
use crate::db::BoundingBox;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("face detection failed: {0}")]
    Detector(String),

    #[error("embedding generation failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One still image sampled out of a clip.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// HH:MM:SS:FF timecode of the source position.
    pub timecode: String,
    pub image_path: PathBuf,
}

/// One face localized within an image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Samples still frames out of a video file at a fixed rate, applying the
/// configured color transform first.
pub trait FrameSampler {
    fn extract(
        &self,
        clip_path: &Path,
        out_dir: &Path,
        sample_rate_fps: f64,
        transform: &ColorTransform,
    ) -> Result<Vec<SampledFrame>, EngineError>;
}

/// Finds faces in a still image.
pub trait FaceDetector {
    fn detect(
        &self,
        image_path: &Path,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, EngineError>;
}

/// Produces an embedding vector for a face. With a region the face is
/// cropped out of the image first; without one the whole image is treated
/// as a face (consent reference photos).
pub trait FaceEmbedder {
    fn embed(
        &self,
        image_path: &Path,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<f32>, EngineError>;
}
