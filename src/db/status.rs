//! Persisted status enums for every entity in the processing graph.
//!
//! Statuses are stored as their lowercase snake_case string form. Forward
//! transitions are enforced in the update queries (`WHERE status IN (...)`),
//! so a crashed or stale writer can never move an entity backwards.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};

/// Watch folder lifecycle: idle until scanned or actively monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchFolderStatus {
    Idle,
    Scanned,
    Active,
    Error,
}

impl WatchFolderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchFolderStatus::Idle => "idle",
            WatchFolderStatus::Scanned => "scanned",
            WatchFolderStatus::Active => "active",
            WatchFolderStatus::Error => "error",
        }
    }
}

impl FromStr for WatchFolderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "idle" => WatchFolderStatus::Idle,
            "scanned" => WatchFolderStatus::Scanned,
            "active" => WatchFolderStatus::Active,
            "error" => WatchFolderStatus::Error,
            other => bail!("unknown watch folder status: {other}"),
        })
    }
}

impl fmt::Display for WatchFolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clip lifecycle. `Pending`/`Unselected`/`Queued` are user-controlled and
/// may move freely among themselves; everything after `Queued` is owned by
/// the pipeline and only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipStatus {
    Pending,
    Unselected,
    Queued,
    ExtractingFrames,
    ExtractionComplete,
    ProcessingComplete,
    Error,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Unselected => "unselected",
            ClipStatus::Queued => "queued",
            ClipStatus::ExtractingFrames => "extracting_frames",
            ClipStatus::ExtractionComplete => "extraction_complete",
            ClipStatus::ProcessingComplete => "processing_complete",
            ClipStatus::Error => "error",
        }
    }

    /// Statuses a user may toggle between before processing starts.
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            ClipStatus::Pending | ClipStatus::Unselected | ClipStatus::Queued
        )
    }

    /// Terminal from the pipeline's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClipStatus::ProcessingComplete | ClipStatus::Error)
    }
}

impl FromStr for ClipStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "pending" => ClipStatus::Pending,
            "unselected" => ClipStatus::Unselected,
            "queued" => ClipStatus::Queued,
            "extracting_frames" => ClipStatus::ExtractingFrames,
            "extraction_complete" => ClipStatus::ExtractionComplete,
            "processing_complete" => ClipStatus::ProcessingComplete,
            "error" => ClipStatus::Error,
            other => bail!("unknown clip status: {other}"),
        })
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Queued,
    DetectingFaces,
    DetectionComplete,
    RecognitionComplete,
    Error,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStatus::Queued => "queued",
            FrameStatus::DetectingFaces => "detecting_faces",
            FrameStatus::DetectionComplete => "detection_complete",
            FrameStatus::RecognitionComplete => "recognition_complete",
            FrameStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameStatus::RecognitionComplete | FrameStatus::Error)
    }
}

impl FromStr for FrameStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "queued" => FrameStatus::Queued,
            "detecting_faces" => FrameStatus::DetectingFaces,
            "detection_complete" => FrameStatus::DetectionComplete,
            "recognition_complete" => FrameStatus::RecognitionComplete,
            "error" => FrameStatus::Error,
            other => bail!("unknown frame status: {other}"),
        })
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceStatus {
    Queued,
    MatchingFaces,
    MatchingComplete,
    Error,
}

impl FaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceStatus::Queued => "queued",
            FaceStatus::MatchingFaces => "matching_faces",
            FaceStatus::MatchingComplete => "matching_complete",
            FaceStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FaceStatus::MatchingComplete | FaceStatus::Error)
    }
}

impl FromStr for FaceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "queued" => FaceStatus::Queued,
            "matching_faces" => FaceStatus::MatchingFaces,
            "matching_complete" => FaceStatus::MatchingComplete,
            "error" => FaceStatus::Error,
            other => bail!("unknown detected face status: {other}"),
        })
    }
}

impl fmt::Display for FaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing task lifecycle. `Cancelling` is set by a stop request and is
/// the signal the worker polls for; the worker acknowledges by moving to
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    GeneratingEmbeddings,
    ExtractingFrames,
    ProcessingClips,
    Complete,
    Error,
    Cancelling,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::GeneratingEmbeddings => "generating_embeddings",
            TaskStatus::ExtractingFrames => "extracting_frames",
            TaskStatus::ProcessingClips => "processing_clips",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses in which the worker is (or should be) running.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending
                | TaskStatus::GeneratingEmbeddings
                | TaskStatus::ExtractingFrames
                | TaskStatus::ProcessingClips
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "pending" => TaskStatus::Pending,
            "generating_embeddings" => TaskStatus::GeneratingEmbeddings,
            "extracting_frames" => TaskStatus::ExtractingFrames,
            "processing_clips" => TaskStatus::ProcessingClips,
            "complete" => TaskStatus::Complete,
            "error" => TaskStatus::Error,
            "cancelling" => TaskStatus::Cancelling,
            "cancelled" => TaskStatus::Cancelled,
            other => bail!("unknown task status: {other}"),
        })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            ClipStatus::Pending,
            ClipStatus::Unselected,
            ClipStatus::Queued,
            ClipStatus::ExtractingFrames,
            ClipStatus::ExtractionComplete,
            ClipStatus::ProcessingComplete,
            ClipStatus::Error,
        ] {
            assert_eq!(s.as_str().parse::<ClipStatus>().unwrap(), s);
        }
        for s in [
            TaskStatus::Pending,
            TaskStatus::GeneratingEmbeddings,
            TaskStatus::ExtractingFrames,
            TaskStatus::ProcessingClips,
            TaskStatus::Complete,
            TaskStatus::Error,
            TaskStatus::Cancelling,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("flying".parse::<FrameStatus>().is_err());
    }

    #[test]
    fn terminal_classification() {
        assert!(FrameStatus::RecognitionComplete.is_terminal());
        assert!(FrameStatus::Error.is_terminal());
        assert!(!FrameStatus::DetectingFaces.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Cancelling.is_terminal());
        assert!(!TaskStatus::Cancelling.is_running());
    }
}
