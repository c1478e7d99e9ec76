//! Frame-to-pose orchestration and lifecycle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::{Sender, TrySendError};
use fiducial_pose_solver::{
    Category, EstimateError, PnpError, PoseEstimate, RawDetection, TargetPoseEstimator,
};
use fiducial_pose_telemetry::{
    TelemetryAggregator, TelemetrySnapshot, OBJECT_DETECTION_CHANNEL, POSE_DETECTION_CHANNEL,
};
use parking_lot::Mutex;
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::{Detector, DetectorError, DetectorFactory, DetectorRole};
use crate::frame::{DecodeError, Frame, PreparedFrame};
use crate::io::{ConfigError, PipelineConfig};

/// Lifecycle of a [`PoseOrchestrator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Uninitialized,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// Lifecycle errors.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: PipelineState,
    },
    #[error("startup failed: {0}")]
    Startup(#[source] DetectorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a frame produced no pose. None of these are fatal.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("pipeline not ready ({0:?})")]
    NotReady(PipelineState),
    #[error("frame {sequence}: processing disabled")]
    ProcessingDisabled { sequence: u64 },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("frame {sequence}: {role:?} detector: {source}")]
    Detector {
        sequence: u64,
        role: DetectorRole,
        #[source]
        source: DetectorError,
    },
    #[error("frame {sequence}: no usable keypoint detections")]
    NoDetections { sequence: u64 },
    #[error("frame {sequence}: {present} target classes present, {missing} missing")]
    Incomplete {
        sequence: u64,
        present: usize,
        missing: usize,
    },
    #[error("frame {sequence}: {source}")]
    Solve {
        sequence: u64,
        #[source]
        source: PnpError,
    },
}

impl FrameError {
    fn from_estimate(sequence: u64, err: EstimateError) -> Self {
        match err {
            EstimateError::NoDetections => Self::NoDetections { sequence },
            EstimateError::Incomplete { present, missing } => Self::Incomplete {
                sequence,
                present,
                missing,
            },
            EstimateError::Solve(source) => Self::Solve { sequence, source },
        }
    }
}

/// Receives each solved pose, at most once per frame.
pub trait PosePublisher: Send + Sync {
    fn publish(&self, pose: &PoseEstimate);

    /// Center of the object detector's top box, pixels.
    fn publish_target_center(&self, _sequence: u64, _center: [f64; 2]) {}
}

impl PosePublisher for Sender<PoseEstimate> {
    fn publish(&self, pose: &PoseEstimate) {
        match self.try_send(pose.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("frame {}: pose queue full, pose dropped", pose.sequence)
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("frame {}: pose receiver gone", pose.sequence)
            }
        }
    }
}

/// Persists raw frames while frame persistence is enabled.
pub trait FrameRecorder: Send + Sync {
    fn record(&self, frame: &PreparedFrame, objects: &[RawDetection]) -> std::io::Result<()>;
}

/// Owned by the frame lock; dropped on stop.
struct FrameStage {
    object: Box<dyn Detector>,
    keypoint: Box<dyn Detector>,
    estimator: TargetPoseEstimator,
}

/// Drives frames through decode, detection, correspondence and EPnP.
///
/// Frames are processed one at a time under a single lock that owns the
/// detectors; a frame holds it until its pose is published. Telemetry writes
/// go through [`telemetry`](Self::telemetry) and never touch that lock.
pub struct PoseOrchestrator {
    config: PipelineConfig,
    state: Mutex<PipelineState>,
    stage: Mutex<Option<FrameStage>>,
    telemetry: OnceLock<Arc<TelemetryAggregator>>,
    processing: AtomicBool,
    persist_frames: AtomicBool,
    publisher: Option<Box<dyn PosePublisher>>,
    recorder: Option<Box<dyn FrameRecorder>>,
}

impl PoseOrchestrator {
    /// Nothing is allocated or loaded until [`start`](Self::start).
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            processing: AtomicBool::new(config.processing_enabled),
            persist_frames: AtomicBool::new(config.persist_frames),
            state: Mutex::new(PipelineState::Uninitialized),
            stage: Mutex::new(None),
            telemetry: OnceLock::new(),
            publisher: None,
            recorder: None,
            config,
        }
    }

    pub fn with_publisher(mut self, publisher: impl PosePublisher + 'static) -> Self {
        self.publisher = Some(Box::new(publisher));
        self
    }

    pub fn with_recorder(mut self, recorder: impl FrameRecorder + 'static) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Shared handle for telemetry producers, allocated by
    /// [`start`](Self::start).
    pub fn telemetry(&self) -> Option<&Arc<TelemetryAggregator>> {
        self.telemetry.get()
    }

    /// Empty until [`start`](Self::start) succeeds and again after
    /// [`stop`](Self::stop).
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry
            .get()
            .map_or_else(TelemetrySnapshot::empty, |t| t.snapshot())
    }

    pub fn set_processing_enabled(&self, enabled: bool) {
        let was = self.processing.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            log::info!("frame processing {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_processing_enabled(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn set_frame_persistence(&self, enabled: bool) {
        if enabled && self.recorder.is_none() {
            log::warn!("frame persistence enabled without a recorder, frames will not be saved");
        }
        self.persist_frames.store(enabled, Ordering::Release);
    }

    pub fn is_frame_persistence_enabled(&self) -> bool {
        self.persist_frames.load(Ordering::Acquire)
    }

    /// Allocate the telemetry channels (all unready), load both detectors and
    /// the estimator, then open the readiness gate.
    ///
    /// Only valid from `Uninitialized`. On failure the orchestrator stays in
    /// `Starting` for good and snapshots stay empty.
    pub fn start(&self, factory: &dyn DetectorFactory) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock();
            if *state != PipelineState::Uninitialized {
                return Err(PipelineError::InvalidState {
                    op: "start",
                    state: *state,
                });
            }
            *state = PipelineState::Starting;
        }
        let telemetry = self
            .telemetry
            .get_or_init(|| Arc::new(self.config.build_telemetry()));

        let assets = &self.config.detectors;
        let load = |role: DetectorRole, path: &Path| {
            factory.load(role, path).map_err(|e| {
                log::error!("startup: {e}");
                PipelineError::Startup(e)
            })
        };
        let object = load(DetectorRole::Object, assets.object.as_path())?;
        let keypoint = load(DetectorRole::Keypoint, assets.keypoint.as_path())?;
        let estimator = self.config.build_estimator().inspect_err(|e| {
            log::error!("startup: {e}");
        })?;

        *self.stage.lock() = Some(FrameStage {
            object,
            keypoint,
            estimator,
        });
        *self.state.lock() = PipelineState::Ready;
        telemetry.gate().open();
        log::info!(
            "pipeline ready: {} target points, {} telemetry channels",
            self.config.target.len(),
            telemetry.specs().len()
        );
        Ok(())
    }

    /// Run one frame through the pipeline, up to and including publishing.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, frame), fields(sequence = frame.sequence))
    )]
    pub fn process_frame(&self, frame: &Frame) -> Result<PoseEstimate, FrameError> {
        let state = self.state();
        if state != PipelineState::Ready {
            return Err(FrameError::NotReady(state));
        }
        let mut guard = self.stage.lock();
        let Some(stage) = guard.as_mut() else {
            return Err(FrameError::NotReady(self.state()));
        };
        let sequence = frame.sequence;

        let prepared = frame
            .decode()
            .inspect_err(|e| log::warn!("dropping frame: {e}"))?;
        if !self.is_processing_enabled() {
            log::debug!("frame {sequence}: processing disabled, dropped");
            return Err(FrameError::ProcessingDisabled { sequence });
        }

        let objects = stage
            .object
            .detect(&prepared)
            .map_err(|source| detector_error(sequence, DetectorRole::Object, source))?;
        self.report_objects(sequence, &objects);

        if self.is_frame_persistence_enabled() {
            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.record(&prepared, &objects) {
                    log::warn!("frame {sequence}: recording failed: {e}");
                }
            }
        }

        let keypoints = stage
            .keypoint
            .detect(&prepared)
            .map_err(|source| detector_error(sequence, DetectorRole::Keypoint, source))?;

        let pose = stage
            .estimator
            .estimate(sequence, &keypoints)
            .map_err(|e| FrameError::from_estimate(sequence, e))?
            .with_capture_time(frame.captured_at);

        self.report_pose(&pose);
        if let Some(publisher) = &self.publisher {
            publisher.publish(&pose);
        }
        drop(guard);
        Ok(pose)
    }

    /// Wait for the in-flight frame, release the detectors and close telemetry.
    pub fn stop(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock();
            if *state != PipelineState::Ready {
                return Err(PipelineError::InvalidState {
                    op: "stop",
                    state: *state,
                });
            }
            *state = PipelineState::ShuttingDown;
        }
        log::info!("pipeline shutting down");

        let released = self.stage.lock().take();
        drop(released);
        if let Some(telemetry) = self.telemetry.get() {
            telemetry.close();
            telemetry.reset();
        }

        *self.state.lock() = PipelineState::Stopped;
        log::info!("pipeline stopped");
        Ok(())
    }

    fn report_objects(&self, sequence: u64, objects: &[RawDetection]) {
        let top = objects
            .iter()
            .filter_map(|d| Some((d, d.top_category()?)))
            .fold(None, |best: Option<(&RawDetection, &Category)>, (d, c)| match best {
                Some((_, b)) if b.score >= c.score => best,
                _ => Some((d, c)),
            });
        let Some((det, category)) = top else {
            log::debug!("frame {sequence}: object detector found nothing");
            return;
        };

        let b = &det.bbox;
        let summary = format!(
            "Detected: {}, Image Sequence: {}, Score: {}, CentreX: {}, CentreY: {}, Height: {}, Width: {}",
            category.label, sequence, category.score, b.center_x, b.center_y, b.height, b.width
        );
        log::info!("{summary}");
        self.write_text(OBJECT_DETECTION_CHANNEL, summary);
        if let Some(publisher) = &self.publisher {
            publisher.publish_target_center(sequence, [b.center_x as f64, b.center_y as f64]);
        }
    }

    fn report_pose(&self, pose: &PoseEstimate) {
        let t = pose.translation;
        let r = pose.rotation;
        let summary = format!(
            "Pose detection results. Relative position: [{}, {}, {}]; Relative attitude: [{}, {}, {}]",
            t.x, t.y, t.z, r.x, r.y, r.z
        );
        log::info!("frame {}: {summary}", pose.sequence);
        self.write_text(POSE_DETECTION_CHANNEL, summary);
    }

    fn write_text(&self, channel: &str, text: String) {
        let Some(telemetry) = self.telemetry.get() else {
            return;
        };
        if let Err(e) = telemetry.write(channel, text) {
            log::debug!("telemetry '{channel}' not updated: {e}");
        }
    }
}

fn detector_error(sequence: u64, role: DetectorRole, source: DetectorError) -> FrameError {
    log::warn!("frame {sequence}: {role:?} detector failed: {source}");
    FrameError::Detector {
        sequence,
        role,
        source,
    }
}
