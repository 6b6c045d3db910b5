//! Frame sampling via the ffmpeg binary.
//!
//! A single ffmpeg invocation per clip applies the color transform, samples
//! at the configured rate and writes numbered PNGs. Source timestamps come
//! from the showinfo filter's stderr lines; when a timestamp cannot be
//! parsed the frame index over the sample rate is used instead.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ColorTransform;

use super::{EngineError, FrameSampler, SampledFrame};

/// Timecode frame rate for the HH:MM:SS:FF display format.
const TIMECODE_FPS: f64 = 25.0;

pub struct FfmpegSampler {
    /// Directory searched for LUT files referenced by bare name.
    luts_dir: PathBuf,
}

impl FfmpegSampler {
    pub fn new(luts_dir: PathBuf) -> Self {
        Self { luts_dir }
    }

    /// Verify the ffmpeg binary is runnable. Called once at startup so a
    /// missing install fails loudly instead of per-clip.
    pub fn check_available() -> Result<(), EngineError> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map_err(|e| EngineError::Decode(format!("ffmpeg not available: {e}")))?;
        if !output.status.success() {
            return Err(EngineError::Decode("ffmpeg -version failed".to_string()));
        }
        Ok(())
    }

    fn filtergraph(&self, sample_rate_fps: f64, transform: &ColorTransform) -> String {
        let color = match transform {
            ColorTransform::Equalize => "eq=contrast=1.5:saturation=1.5".to_string(),
            ColorTransform::Lut { file } => {
                let path = self.luts_dir.join(file);
                format!("lut3d='{}'", path.display())
            }
        };
        format!("{color},fps={sample_rate_fps},showinfo")
    }
}

impl FrameSampler for FfmpegSampler {
    fn extract(
        &self,
        clip_path: &Path,
        out_dir: &Path,
        sample_rate_fps: f64,
        transform: &ColorTransform,
    ) -> Result<Vec<SampledFrame>, EngineError> {
        std::fs::create_dir_all(out_dir)?;
        let pattern = out_dir.join("frame_%06d.png");

        let output = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(clip_path)
            .arg("-vf")
            .arg(self.filtergraph(sample_rate_fps, transform))
            .arg("-vsync")
            .arg("vfr")
            .arg("-q:v")
            .arg("2")
            .arg(&pattern)
            .output()
            .map_err(|e| EngineError::Decode(format!("failed to spawn ffmpeg: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(EngineError::Decode(format!(
                "ffmpeg exited with {}: {tail}",
                output.status
            )));
        }

        let timestamps = parse_showinfo_timestamps(&stderr);

        let mut frames = Vec::new();
        for index in 0.. {
            let path = out_dir.join(format!("frame_{:06}.png", index + 1));
            if !path.exists() {
                break;
            }
            let seconds = timestamps
                .get(index)
                .copied()
                .unwrap_or(index as f64 / sample_rate_fps);
            frames.push(SampledFrame {
                timecode: format_timecode(seconds),
                image_path: path,
            });
        }

        if frames.is_empty() {
            return Err(EngineError::Decode(format!(
                "no frames produced from {}",
                clip_path.display()
            )));
        }

        tracing::debug!(
            clip = %clip_path.display(),
            frames = frames.len(),
            "Extracted frames"
        );
        Ok(frames)
    }
}

/// Pull `pts_time:` values out of showinfo stderr lines, in frame order.
fn parse_showinfo_timestamps(stderr: &str) -> Vec<f64> {
    let mut timestamps = Vec::new();
    for line in stderr.lines() {
        if !line.contains("Parsed_showinfo") {
            continue;
        }
        if let Some(rest) = line.split("pts_time:").nth(1) {
            let token: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if let Ok(value) = token.parse::<f64>() {
                timestamps.push(value);
            }
        }
    }
    timestamps
}

/// Render seconds as an HH:MM:SS:FF timecode at 25 fps. The string sorts
/// lexicographically in time order, which frame ordering relies on.
pub fn format_timecode(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    let frames = ((seconds - total as f64) * TIMECODE_FPS) as u64;
    format!(
        "{:02}:{:02}:{:02}:{:02}",
        hours,
        minutes,
        secs,
        frames.min(TIMECODE_FPS as u64 - 1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_formatting() {
        assert_eq!(format_timecode(0.0), "00:00:00:00");
        assert_eq!(format_timecode(1.5), "00:00:01:12");
        assert_eq!(format_timecode(61.0), "00:01:01:00");
        assert_eq!(format_timecode(3661.5), "01:01:01:12");
        // Never renders a frame count at or past the rate.
        assert_eq!(format_timecode(0.9999), "00:00:00:24");
        assert_eq!(format_timecode(-3.0), "00:00:00:00");
    }

    #[test]
    fn showinfo_timestamps_parse_in_order() {
        let stderr = "\
[Parsed_showinfo_2 @ 0x55] n:   0 pts:      0 pts_time:0       duration_time:0.04\n\
random ffmpeg noise line\n\
[Parsed_showinfo_2 @ 0x55] n:   1 pts:  12800 pts_time:0.16667 duration_time:0.04\n\
[Parsed_showinfo_2 @ 0x55] n:   2 pts:  25600 pts_time:0.33333 duration_time:0.04\n";
        let ts = parse_showinfo_timestamps(stderr);
        assert_eq!(ts.len(), 3);
        assert!((ts[1] - 0.16667).abs() < 1e-6);
    }

    #[test]
    fn filtergraph_selects_transform() {
        let sampler = FfmpegSampler::new(PathBuf::from("/luts"));
        assert_eq!(
            sampler.filtergraph(6.0, &ColorTransform::Equalize),
            "eq=contrast=1.5:saturation=1.5,fps=6,showinfo"
        );
        assert_eq!(
            sampler.filtergraph(
                1.0,
                &ColorTransform::Lut {
                    file: "film.cube".into()
                }
            ),
            "lut3d='/luts/film.cube',fps=1,showinfo"
        );
    }
}
