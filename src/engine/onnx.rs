//! ONNX-backed face detection (UltraFace) and embeddings (ArcFace).
//!
//! Models are downloaded on first use into the local data directory and
//! held in process-wide sessions behind mutexes; ort sessions need mutable
//! access to run.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::config::DetectorBackend;
use crate::db::BoundingBox;

use super::{Detection, EngineError, FaceDetector, FaceEmbedder};

/// Face detection model (UltraFace - lightweight and fast)
static DETECTION_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();
/// Face embedding model (ArcFace - generates 512-dim embeddings)
static EMBEDDING_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

const NMS_THRESHOLD: f32 = 0.3;

pub struct OnnxEngine {
    backend: DetectorBackend,
}

impl OnnxEngine {
    pub fn new(backend: DetectorBackend) -> Self {
        Self { backend }
    }
}

/// Get the models directory path
fn get_models_dir() -> Result<PathBuf> {
    let data_dir =
        dirs::data_local_dir().ok_or_else(|| anyhow!("Could not find local data directory"))?;
    let models_dir = data_dir.join("clearframe").join("models");
    std::fs::create_dir_all(&models_dir)?;
    Ok(models_dir)
}

/// Download a model file if it doesn't exist
fn ensure_model(filename: &str, url: &str) -> Result<PathBuf> {
    let models_dir = get_models_dir()?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn backend_model(backend: DetectorBackend) -> (&'static str, &'static str) {
    match backend {
        DetectorBackend::UltraFace320 => (
            "ultraface-320.onnx",
            "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
        ),
        DetectorBackend::UltraFace640 => (
            "ultraface-640.onnx",
            "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-640.onnx",
        ),
    }
}

fn backend_input_size(backend: DetectorBackend) -> (u32, u32) {
    match backend {
        DetectorBackend::UltraFace320 => (320, 240),
        DetectorBackend::UltraFace640 => (640, 480),
    }
}

fn init_detection_model(backend: DetectorBackend) -> Result<()> {
    if DETECTION_MODEL.get().is_some() {
        return Ok(());
    }

    let (filename, url) = backend_model(backend);
    let detection_model_path = ensure_model(filename, url)?;

    let detection_session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&detection_model_path)?;

    let _ = DETECTION_MODEL.set(Mutex::new(detection_session));
    Ok(())
}

fn init_embedding_model() -> Result<()> {
    if EMBEDDING_MODEL.get().is_some() {
        return Ok(());
    }

    let embedding_model_path = ensure_model(
        "arcface-resnet100.onnx",
        "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx",
    )?;

    let embedding_session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(&embedding_model_path)?;

    let _ = EMBEDDING_MODEL.set(Mutex::new(embedding_session));
    Ok(())
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| anyhow!("Failed to load image: {}", e))
}

impl FaceDetector for OnnxEngine {
    fn detect(
        &self,
        image_path: &Path,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, EngineError> {
        detect_impl(self.backend, image_path, confidence_threshold)
            .map_err(|e| EngineError::Detector(e.to_string()))
    }
}

impl FaceEmbedder for OnnxEngine {
    fn embed(
        &self,
        image_path: &Path,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<f32>, EngineError> {
        embed_impl(image_path, region).map_err(|e| EngineError::Embedding(e.to_string()))
    }
}

fn detect_impl(
    backend: DetectorBackend,
    image_path: &Path,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    init_detection_model(backend)?;

    let img = load_image(image_path)?;
    let mut session = DETECTION_MODEL
        .get()
        .ok_or_else(|| anyhow!("Detection model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;

    run_ultraface_detection(&mut session, &img, backend, confidence_threshold)
}

fn embed_impl(image_path: &Path, region: Option<&BoundingBox>) -> Result<Vec<f32>> {
    init_embedding_model()?;

    let img = load_image(image_path)?;
    let (width, height) = img.dimensions();
    let face = match region {
        Some(bbox) => crop_face(&img, bbox, width, height),
        None => img,
    };

    let mut session = EMBEDDING_MODEL
        .get()
        .ok_or_else(|| anyhow!("Embedding model not initialized"))?
        .lock()
        .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

    run_arcface_embedding(&mut session, &face)
}

/// Run UltraFace detection model
fn run_ultraface_detection(
    session: &mut Session,
    img: &DynamicImage,
    backend: DetectorBackend,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    let (input_width, input_height) = backend_input_size(backend);
    let (orig_width, orig_height) = img.dimensions();

    // Resize image to model input size (use Triangle/bilinear for speed)
    let resized = img.resize_exact(input_width, input_height, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // Convert to tensor (NCHW format, normalized)
    let plane = (input_height * input_width) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..input_height as usize {
        for x in 0..input_width as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * input_width as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, input_height as usize, input_width as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    // UltraFace outputs: scores [1, anchors, 2] and boxes [1, anchors, 4]
    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    let mut detections = Vec::new();
    let num_anchors = scores_shape[1] as usize;

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];

        if confidence > confidence_threshold {
            // Box coordinates are normalized x1, y1, x2, y2.
            let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
            let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
            let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
            let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

            let bbox = BoundingBox {
                x: x1.max(0),
                y: y1.max(0),
                width: (x2 - x1).max(1),
                height: (y2 - y1).max(1),
            };

            detections.push(Detection { bbox, confidence });
        }
    }

    Ok(nms(detections, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }

            let iou = compute_iou(&detections[i].bbox, &detections[j].bbox);
            if iou > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union between two bounding boxes
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop face region from image with padding
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    // Add 20% padding around the face
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = (bbox.x - padding_x).max(0) as u32;
    let y = (bbox.y - padding_y).max(0) as u32;
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace embedding model
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            // ArcFace normalization: (pixel - 127.5) / 127.5
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // ArcFace ONNX model uses "data" as input name
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_embedding_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    // Normalize the embedding (L2 normalization)
    let embedding_vec: Vec<f32> = embedding_data.to_vec();
    let norm: f32 = embedding_vec.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        Ok(embedding_vec.iter().map(|x| x / norm).collect())
    } else {
        Ok(embedding_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &b) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            Detection {
                bbox: BoundingBox { x: 0, y: 0, width: 10, height: 10 },
                confidence: 0.9,
            },
            Detection {
                bbox: BoundingBox { x: 1, y: 1, width: 10, height: 10 },
                confidence: 0.8,
            },
            Detection {
                bbox: BoundingBox { x: 50, y: 50, width: 10, height: 10 },
                confidence: 0.7,
            },
        ];
        let kept = nms(detections, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].bbox.x, 50);
    }
}
