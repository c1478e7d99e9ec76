//! JSON configuration and report helpers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fiducial_pose_core::{CameraIntrinsics, TargetModel};
use fiducial_pose_solver::{
    EstimateError, EstimatorBuildError, PoseEstimate, SolverParams, TargetPoseEstimator,
};
use fiducial_pose_telemetry::{TelemetryAggregator, TelemetryRegistry};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Estimator(#[from] EstimatorBuildError),
}

fn default_object_asset() -> PathBuf {
    PathBuf::from("dockCamObjectDetector.tflite")
}

fn default_keypoint_asset() -> PathBuf {
    PathBuf::from("dockcam_pose.tflite")
}

fn default_true() -> bool {
    true
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

/// Asset paths handed to the [`DetectorFactory`](crate::DetectorFactory).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorAssets {
    #[serde(default = "default_object_asset")]
    pub object: PathBuf,
    #[serde(default = "default_keypoint_asset")]
    pub keypoint: PathBuf,
}

impl Default for DetectorAssets {
    fn default() -> Self {
        Self {
            object: default_object_asset(),
            keypoint: default_keypoint_asset(),
        }
    }
}

/// Everything the orchestrator needs at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub camera: CameraIntrinsics,
    pub target: TargetModel,
    #[serde(default)]
    pub solver: SolverParams,
    #[serde(default)]
    pub detectors: DetectorAssets,
    #[serde(default = "default_true")]
    pub processing_enabled: bool,
    #[serde(default)]
    pub persist_frames: bool,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    /// Custom channel set; the standard registry when absent.
    #[serde(default)]
    pub telemetry: Option<TelemetryRegistry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::reference()
    }
}

impl PipelineConfig {
    /// Dock camera, eight-point target, default solver settings.
    pub fn reference() -> Self {
        Self {
            camera: CameraIntrinsics::reference(),
            target: TargetModel::reference(),
            solver: SolverParams::default(),
            detectors: DetectorAssets::default(),
            processing_enabled: true,
            persist_frames: false,
            snapshot_interval_ms: default_snapshot_interval_ms(),
            telemetry: None,
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms.max(1))
    }

    /// Build the per-frame estimator from the camera, target and solver settings.
    pub fn build_estimator(&self) -> Result<TargetPoseEstimator, ConfigError> {
        Ok(TargetPoseEstimator::new(
            self.target.clone(),
            self.camera,
            &self.solver,
        )?)
    }

    /// Build the telemetry aggregator with every channel unready.
    pub fn build_telemetry(&self) -> TelemetryAggregator {
        match &self.telemetry {
            Some(registry) => TelemetryAggregator::new(registry.clone()),
            None => TelemetryAggregator::standard(),
        }
    }
}

/// Outcome of one replayed frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameReport {
    pub sequence: u64,
    #[serde(default)]
    pub pose: Option<PoseEstimate>,
    #[serde(default)]
    pub error: Option<String>,
}

impl FrameReport {
    pub fn from_result(sequence: u64, result: Result<PoseEstimate, EstimateError>) -> Self {
        match result {
            Ok(pose) => Self {
                sequence,
                pose: Some(pose),
                error: None,
            },
            Err(e) => Self {
                sequence,
                pose: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Report written by `fiducial-pose solve`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveReport {
    pub config_path: String,
    pub detections_path: String,
    pub frames: Vec<FrameReport>,
}

impl SolveReport {
    pub fn solved(&self) -> usize {
        self.frames.iter().filter(|f| f.pose.is_some()).count()
    }

    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_config_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline.json");
        PipelineConfig::reference().write_json(&path).expect("write");

        let cfg = PipelineConfig::load_json(&path).expect("load");
        assert_eq!(cfg.camera, CameraIntrinsics::reference());
        assert_eq!(cfg.target.len(), 8);
        assert_eq!(cfg.solver.min_score, 0.5);
        assert_eq!(cfg.detectors, DetectorAssets::default());
        assert!(cfg.processing_enabled);
        assert!(cfg.build_estimator().is_ok());
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{
            "camera": {"fx": 900.0, "fy": 900.0, "cx": 525.0, "cy": 600.0},
            "target": [
                {"class_index": 0, "position": [-1.0, -1.0, 0.0]},
                {"class_index": 1, "position": [1.0, -1.0, 0.0]},
                {"class_index": 2, "position": [1.0, 1.0, 0.0]},
                {"class_index": 3, "position": [-1.0, 1.0, 0.0]}
            ]
        }"#;
        let cfg: PipelineConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.snapshot_interval(), Duration::from_secs(1));
        assert_eq!(cfg.solver.min_correspondences, None);
        assert_eq!(cfg.build_estimator().expect("estimator").min_correspondences(), 4);
        assert!(cfg.build_telemetry().specs().len() > 20);
    }

    #[test]
    fn invalid_target_is_rejected_at_load() {
        let json = r#"{
            "camera": {"fx": 900.0, "fy": 900.0, "cx": 525.0, "cy": 600.0},
            "target": [
                {"class_index": 0, "position": [0.0, 0.0, 0.0]},
                {"class_index": 0, "position": [1.0, 0.0, 0.0]}
            ]
        }"#;
        assert!(serde_json::from_str::<PipelineConfig>(json).is_err());
    }
}
