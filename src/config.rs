use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for extracted frame images. Each clip gets a
    /// subdirectory keyed by its id.
    #[serde(default = "default_frames_root")]
    pub frames_root: PathBuf,

    /// Directory searched for .cube LUT files referenced by name.
    #[serde(default = "default_luts_dir")]
    pub luts_dir: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minutes without a new file before a monitor winds itself down.
    #[serde(default = "default_inactivity_timeout_minutes")]
    pub inactivity_timeout_minutes: u64,
}

/// Color transform applied before sampling frames. Exactly one is active;
/// equalize and a LUT are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ColorTransform {
    Equalize,
    Lut { file: String },
}

impl ColorTransform {
    /// Build from the two user-facing options, rejecting the ambiguous
    /// both-set case.
    pub fn from_options(use_equalize: bool, lut_file: Option<String>) -> Result<Self> {
        match (use_equalize, lut_file) {
            (true, Some(_)) => {
                anyhow::bail!("equalize and a LUT file cannot both be selected")
            }
            (_, Some(file)) => Ok(ColorTransform::Lut { file }),
            _ => Ok(ColorTransform::Equalize),
        }
    }
}

impl Default for ColorTransform {
    fn default() -> Self {
        ColorTransform::Equalize
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    #[default]
    UltraFace320,
    UltraFace640,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    /// Distance between two embedding vectors. Lower is more similar for
    /// every metric, so a single threshold comparison works across all
    /// three.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (na * nb)
            }
            DistanceMetric::Euclidean => euclidean(a, b),
            DistanceMetric::EuclideanL2 => {
                let an = l2_normalize(a);
                let bn = l2_normalize(b);
                euclidean(&an, &bn)
            }
        }
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Frames sampled per second of video.
    #[serde(default = "default_sample_rate_fps")]
    pub sample_rate_fps: f64,

    #[serde(default)]
    pub color_transform: ColorTransform,

    #[serde(default)]
    pub detector_backend: DetectorBackend,

    /// Minimum detector confidence for a face to be recorded (0..=1).
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Inclusive upper bound on match distance.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Cap on work-discovery passes per run. Guards against a writer that
    /// keeps requeueing work under the pipeline's feet.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_fps <= 0.0 {
            anyhow::bail!(
                "sample_rate_fps must be positive, got {}",
                self.sample_rate_fps
            );
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            anyhow::bail!(
                "detection_confidence must be within 0..=1, got {}",
                self.detection_confidence
            );
        }
        if self.match_threshold <= 0.0 {
            anyhow::bail!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            );
        }
        if self.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }
        Ok(())
    }
}

fn default_sample_rate_fps() -> f64 {
    1.0
}

fn default_detection_confidence() -> f32 {
    0.7
}

fn default_embedding_model() -> String {
    "arcface".to_string()
}

fn default_match_threshold() -> f32 {
    0.68
}

fn default_max_iterations() -> usize {
    10
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sample_rate_fps: default_sample_rate_fps(),
            color_transform: ColorTransform::default(),
            detector_backend: DetectorBackend::default(),
            detection_confidence: default_detection_confidence(),
            embedding_model: default_embedding_model(),
            distance_metric: DistanceMetric::default(),
            match_threshold: default_match_threshold(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_inactivity_timeout_minutes() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            inactivity_timeout_minutes: default_inactivity_timeout_minutes(),
        }
    }
}

fn default_video_extensions() -> Vec<String> {
    [
        "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp", "3g2",
        "mxf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clearframe")
        .join("clearframe.db")
}

fn default_frames_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clearframe")
        .join("frames")
}

fn default_luts_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clearframe")
        .join("luts")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            frames_root: default_frames_root(),
            luts_dir: default_luts_dir(),
            scanner: ScannerConfig::default(),
            monitor: MonitorConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clearframe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_transform_options_are_exclusive() {
        assert_eq!(
            ColorTransform::from_options(false, None).unwrap(),
            ColorTransform::Equalize
        );
        assert_eq!(
            ColorTransform::from_options(true, None).unwrap(),
            ColorTransform::Equalize
        );
        assert_eq!(
            ColorTransform::from_options(false, Some("film.cube".into())).unwrap(),
            ColorTransform::Lut {
                file: "film.cube".into()
            }
        );
        assert!(ColorTransform::from_options(true, Some("film.cube".into())).is_err());
    }

    #[test]
    fn processing_config_validation() {
        let mut cfg = ProcessingConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.sample_rate_fps = 0.0;
        assert!(cfg.validate().is_err());
        cfg.sample_rate_fps = 6.0;

        cfg.detection_confidence = 1.5;
        assert!(cfg.validate().is_err());
        cfg.detection_confidence = 1.0;
        assert!(cfg.validate().is_ok());

        cfg.match_threshold = -0.1;
        assert!(cfg.validate().is_err());
        cfg.match_threshold = 0.68;

        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn distance_metrics() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];

        assert!((DistanceMetric::Cosine.distance(&a, &a)).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Euclidean.distance(&a, &b) - 2f32.sqrt()).abs() < 1e-6);

        // L2 variant is scale-invariant.
        let a_scaled = [10.0f32, 0.0];
        assert!(
            (DistanceMetric::EuclideanL2.distance(&a_scaled, &b)
                - DistanceMetric::EuclideanL2.distance(&a, &b))
            .abs()
                < 1e-6
        );
    }
}
