//! Relative pose of a known fiducial target from a monocular camera stream.
//!
//! This crate ties the workspace together:
//!
//! - [`PoseOrchestrator`] owns the detectors and runs each frame through
//!   decode, object and keypoint detection, class correspondences and EPnP.
//! - A [`TelemetryAggregator`] collects independently arriving signals and
//!   serves gated point-in-time snapshots.
//! - [`PipelineConfig`] loads and writes the JSON configuration.
//!
//! The geometric building blocks are re-exported from `fiducial-pose-core`
//! and `fiducial-pose-solver`.
//!
//! ```no_run
//! use fiducial_pose::{PipelineConfig, PoseOrchestrator, RecordedDetectorFactory};
//!
//! let orchestrator = PoseOrchestrator::new(PipelineConfig::reference());
//! orchestrator.start(&RecordedDetectorFactory)?;
//! println!("{}", serde_json::to_string(&orchestrator.snapshot())?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod detector;
mod frame;
mod io;
mod pipeline;

pub use detector::{
    load_recording, Detector, DetectorError, DetectorFactory, DetectorRole, RecordedDetector,
    RecordedDetectorFactory, RecordedFrame,
};
pub use frame::{DecodeError, Frame, PreparedFrame};
pub use io::{ConfigError, DetectorAssets, FrameReport, PipelineConfig, SolveReport};
pub use pipeline::{
    FrameError, FrameRecorder, PipelineError, PipelineState, PoseOrchestrator, PosePublisher,
};

pub use fiducial_pose_core::{
    init_with_filter, init_with_level, parse_level_filter, CameraError, CameraIntrinsics,
    Distortion, LogFilter, TargetModel, TargetModelError, TargetPoint, REFERENCE_TARGET_POINTS,
};
#[cfg(feature = "tracing")]
pub use fiducial_pose_core::init_tracing;
pub use fiducial_pose_solver::{
    BoundingBox, Category, CorrespondenceBuilder, Correspondences, DetectionAdapter,
    DetectionObservation, DuplicatePolicy, EpnpParams, EpnpSolver, EstimateError, PnpError,
    PoseEstimate, PoseSolver, RawDetection, SolverParams, TargetPoseEstimator,
};
pub use fiducial_pose_telemetry::{
    ChannelValue, ReadinessGate, SnapshotReporter, TelemetryAggregator, TelemetryError,
    TelemetryRegistry, TelemetrySnapshot,
};
