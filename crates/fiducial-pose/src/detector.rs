//! Detector seams and a replaying implementation.
//!
//! Inference engines live outside this crate. The orchestrator only needs a
//! [`DetectorFactory`] that loads the object detector and the keypoint
//! detector from their assets at startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use fiducial_pose_solver::RawDetection;
use serde::{Deserialize, Serialize};

use crate::frame::PreparedFrame;

/// Which of the two detectors an asset is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorRole {
    /// Finds the target as a whole.
    Object,
    /// Finds the individual target keypoints, one class per keypoint.
    Keypoint,
}

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("{role:?} detector asset {}: {reason}", path.display())]
    Load {
        role: DetectorRole,
        path: PathBuf,
        reason: String,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A loaded detector. Called from the frame path only, one frame at a time.
pub trait Detector: Send {
    fn detect(&mut self, frame: &PreparedFrame) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Loads detectors at orchestrator startup.
pub trait DetectorFactory {
    fn load(&self, role: DetectorRole, asset: &Path) -> Result<Box<dyn Detector>, DetectorError>;
}

/// Detections recorded for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub sequence: u64,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// Read a JSON list of [`RecordedFrame`]s.
pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<RecordedFrame>, DetectorError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Replays recorded detections by frame sequence number.
///
/// Frames with no recording yield no detections.
#[derive(Clone, Debug, Default)]
pub struct RecordedDetector {
    frames: HashMap<u64, Vec<RawDetection>>,
}

impl RecordedDetector {
    pub fn new(frames: impl IntoIterator<Item = RecordedFrame>) -> Self {
        Self {
            frames: frames
                .into_iter()
                .map(|f| (f.sequence, f.detections))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for RecordedDetector {
    fn detect(&mut self, frame: &PreparedFrame) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(self.frames.get(&frame.sequence).cloned().unwrap_or_default())
    }
}

/// [`DetectorFactory`] whose assets are recordings on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordedDetectorFactory;

impl DetectorFactory for RecordedDetectorFactory {
    fn load(&self, role: DetectorRole, asset: &Path) -> Result<Box<dyn Detector>, DetectorError> {
        let frames = load_recording(asset).map_err(|e| DetectorError::Load {
            role,
            path: asset.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!(
            "{role:?} detector: replaying {} recorded frames from {}",
            frames.len(),
            asset.display()
        );
        Ok(Box::new(RecordedDetector::new(frames)))
    }
}
