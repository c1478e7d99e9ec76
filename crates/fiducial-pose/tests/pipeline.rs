use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use approx::assert_abs_diff_eq;
use crossbeam_channel::{Receiver, Sender};
use fiducial_pose::{
    BoundingBox, CameraIntrinsics, Category, Detector, DetectorError, DetectorFactory,
    DetectorRole, Frame, FrameError, FrameRecorder, PipelineConfig, PipelineError, PipelineState,
    PoseEstimate, PoseOrchestrator, PosePublisher, PreparedFrame, RawDetection, SolverParams,
    TargetModel, TelemetryError,
};
use image::{GrayImage, ImageFormat, Luma};
use nalgebra::{Point3, Rotation3, Vector3};

const RVEC: [f64; 3] = [0.1, -0.2, 0.05];
const TVEC: [f64; 3] = [0.05, -0.03, 1.5];

fn keypoints() -> Vec<RawDetection> {
    let camera = CameraIntrinsics::reference();
    let r = Rotation3::from_scaled_axis(Vector3::from(RVEC));
    let t = Vector3::from(TVEC);
    TargetModel::reference()
        .points()
        .iter()
        .map(|p| {
            let px = camera
                .project(&Point3::from(r * p.position.coords + t))
                .expect("in front");
            RawDetection::new(
                p.class_index as i64,
                0.9,
                BoundingBox {
                    center_x: px.x as f32,
                    center_y: px.y as f32,
                    width: 10.0,
                    height: 10.0,
                },
            )
        })
        .collect()
}

fn dock_box() -> RawDetection {
    RawDetection {
        categories: vec![Category {
            index: 0,
            label: "dock".into(),
            score: 0.87,
        }],
        bbox: BoundingBox::from_edges(400.0, 500.0, 650.0, 700.0),
    }
}

fn png_frame(sequence: u64) -> Frame {
    let img = GrayImage::from_pixel(16, 12, Luma([128]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode");
    Frame::new(
        sequence,
        SystemTime::UNIX_EPOCH + Duration::from_secs(sequence),
        bytes,
    )
}

struct Scripted {
    output: Vec<RawDetection>,
    calls: Arc<AtomicUsize>,
}

impl Detector for Scripted {
    fn detect(&mut self, _frame: &PreparedFrame) -> Result<Vec<RawDetection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

struct MockFactory {
    object: Vec<RawDetection>,
    keypoint: Vec<RawDetection>,
    fail: Option<DetectorRole>,
    calls: Arc<AtomicUsize>,
}

impl MockFactory {
    fn new(keypoint: Vec<RawDetection>) -> Self {
        Self {
            object: vec![dock_box()],
            keypoint,
            fail: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DetectorFactory for MockFactory {
    fn load(&self, role: DetectorRole, asset: &Path) -> Result<Box<dyn Detector>, DetectorError> {
        if self.fail == Some(role) {
            return Err(DetectorError::Load {
                role,
                path: asset.to_path_buf(),
                reason: "corrupt model".into(),
            });
        }
        let output = match role {
            DetectorRole::Object => self.object.clone(),
            DetectorRole::Keypoint => self.keypoint.clone(),
        };
        Ok(Box::new(Scripted {
            output,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct CountingRecorder(Arc<AtomicUsize>);

impl FrameRecorder for CountingRecorder {
    fn record(&self, _frame: &PreparedFrame, objects: &[RawDetection]) -> std::io::Result<()> {
        assert_eq!(objects.len(), 1);
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn ready_pipeline_solves_publishes_and_reports() {
    let (tx, rx) = crossbeam_channel::bounded(4);
    let recorded = Arc::new(AtomicUsize::new(0));
    let orchestrator = PoseOrchestrator::new(PipelineConfig::reference())
        .with_publisher(tx)
        .with_recorder(CountingRecorder(Arc::clone(&recorded)));

    assert_eq!(orchestrator.state(), PipelineState::Uninitialized);
    assert!(orchestrator.telemetry().is_none());
    assert!(orchestrator.snapshot().is_empty());
    assert!(matches!(
        orchestrator.process_frame(&png_frame(1)),
        Err(FrameError::NotReady(PipelineState::Uninitialized))
    ));

    orchestrator
        .start(&MockFactory::new(keypoints()))
        .expect("start");
    assert_eq!(orchestrator.state(), PipelineState::Ready);

    orchestrator.set_frame_persistence(true);
    let pose = orchestrator.process_frame(&png_frame(7)).expect("pose");
    assert_eq!(pose.sequence, 7);
    assert_eq!(
        pose.captured_at,
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(7))
    );
    assert_abs_diff_eq!(pose.translation, Vector3::from(TVEC), epsilon = 1e-4);
    assert_abs_diff_eq!(pose.rotation, Vector3::from(RVEC), epsilon = 1e-3);
    assert_eq!(recorded.load(Ordering::SeqCst), 1);

    let published = rx.try_recv().expect("published pose");
    assert_eq!(published, pose);
    assert!(rx.try_recv().is_err());

    let snap = orchestrator.snapshot();
    assert!(!snap.is_empty());
    let objects = snap
        .get("Object Detection Results")
        .and_then(|e| e.value.as_text())
        .expect("object summary");
    assert!(objects.starts_with("Detected: dock, Image Sequence: 7, Score: 0.87"));
    let pose_text = snap
        .get("Pose Detection Results")
        .and_then(|e| e.value.as_text())
        .expect("pose summary");
    assert!(pose_text.starts_with("Pose detection results. Relative position: ["));
}

#[test]
fn detector_load_failure_keeps_the_pipeline_starting() {
    let mut factory = MockFactory::new(keypoints());
    factory.fail = Some(DetectorRole::Keypoint);
    let orchestrator = PoseOrchestrator::new(PipelineConfig::reference());

    let err = orchestrator.start(&factory).expect_err("startup must fail");
    assert!(matches!(err, PipelineError::Startup(DetectorError::Load { .. })));
    assert_eq!(orchestrator.state(), PipelineState::Starting);
    assert!(orchestrator.snapshot().is_empty());

    factory.fail = None;
    assert!(matches!(
        orchestrator.start(&factory),
        Err(PipelineError::InvalidState {
            state: PipelineState::Starting,
            ..
        })
    ));
    assert!(matches!(
        orchestrator.process_frame(&png_frame(1)),
        Err(FrameError::NotReady(PipelineState::Starting))
    ));
}

#[test]
fn disabled_processing_drops_frames_before_detection() {
    let factory = MockFactory::new(keypoints());
    let orchestrator = PoseOrchestrator::new(PipelineConfig::reference());
    orchestrator.start(&factory).expect("start");

    orchestrator.set_processing_enabled(false);
    assert!(matches!(
        orchestrator.process_frame(&png_frame(3)),
        Err(FrameError::ProcessingDisabled { sequence: 3 })
    ));
    assert_eq!(factory.calls.load(Ordering::SeqCst), 0);

    orchestrator.set_processing_enabled(true);
    assert!(orchestrator.process_frame(&png_frame(4)).is_ok());
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn undecodable_and_incomplete_frames_are_dropped() {
    let mut partial = keypoints();
    partial.retain(|d| d.categories[0].index != 6);
    let factory = MockFactory::new(partial);
    let orchestrator = PoseOrchestrator::new(PipelineConfig::reference());
    orchestrator.start(&factory).expect("start");

    let junk = Frame::new(1, SystemTime::now(), vec![0xde, 0xad, 0xbe, 0xef]);
    assert!(matches!(
        orchestrator.process_frame(&junk),
        Err(FrameError::Decode(_))
    ));
    assert_eq!(factory.calls.load(Ordering::SeqCst), 0);

    assert!(matches!(
        orchestrator.process_frame(&png_frame(2)),
        Err(FrameError::Incomplete {
            sequence: 2,
            present: 7,
            missing: 1
        })
    ));
    assert_eq!(orchestrator.state(), PipelineState::Ready);
}

#[test]
fn stop_releases_detectors_and_closes_telemetry() {
    let orchestrator = PoseOrchestrator::new(PipelineConfig::reference());
    assert!(matches!(
        orchestrator.stop(),
        Err(PipelineError::InvalidState {
            state: PipelineState::Uninitialized,
            ..
        })
    ));

    orchestrator
        .start(&MockFactory::new(keypoints()))
        .expect("start");
    let telemetry = Arc::clone(orchestrator.telemetry().expect("allocated by start"));
    telemetry.write("/simulinkphase", 2_i64).expect("write");
    assert!(!orchestrator.snapshot().is_empty());

    orchestrator.stop().expect("stop");
    assert_eq!(orchestrator.state(), PipelineState::Stopped);
    assert!(matches!(
        orchestrator.process_frame(&png_frame(1)),
        Err(FrameError::NotReady(PipelineState::Stopped))
    ));
    assert_eq!(
        telemetry.write("/simulinkphase", 3_i64),
        Err(TelemetryError::Closed)
    );
    assert!(!telemetry.is_ready("/simulinkphase"));
    assert!(orchestrator.snapshot().is_empty());
}

#[test]
fn telemetry_writers_do_not_wait_for_the_frame_path() {
    let orchestrator = Arc::new(PoseOrchestrator::new(PipelineConfig::reference()));
    orchestrator
        .start(&MockFactory::new(keypoints()))
        .expect("start");

    let telemetry = Arc::clone(orchestrator.telemetry().expect("telemetry"));
    let writer = std::thread::spawn(move || {
        for i in 0..200 {
            telemetry
                .write("/gnc/ekf/position", [i as f64, 0.0, 0.0])
                .expect("write");
        }
    });
    for seq in 0..5 {
        orchestrator.process_frame(&png_frame(seq)).expect("pose");
    }
    writer.join().expect("writer");

    let snap = orchestrator.snapshot();
    assert_eq!(
        snap.get("EKF Position").and_then(|e| e.value.as_text()),
        Some("[199.0000, 0.0000, 0.0000]")
    );
}

/// Publisher that stays busy for a while, flagging while it does.
struct SlowPublisher {
    publishing: Arc<AtomicBool>,
}

impl PosePublisher for SlowPublisher {
    fn publish(&self, _pose: &PoseEstimate) {
        self.publishing.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.publishing.store(false, Ordering::SeqCst);
    }
}

/// Counts detections that start while a pose is still being published.
struct Watchful {
    output: Vec<RawDetection>,
    publishing: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl Detector for Watchful {
    fn detect(&mut self, _frame: &PreparedFrame) -> Result<Vec<RawDetection>, DetectorError> {
        if self.publishing.load(Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.output.clone())
    }
}

struct WatchfulFactory {
    publishing: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl DetectorFactory for WatchfulFactory {
    fn load(&self, role: DetectorRole, _asset: &Path) -> Result<Box<dyn Detector>, DetectorError> {
        let output = match role {
            DetectorRole::Object => vec![dock_box()],
            DetectorRole::Keypoint => keypoints(),
        };
        Ok(Box::new(Watchful {
            output,
            publishing: Arc::clone(&self.publishing),
            overlaps: Arc::clone(&self.overlaps),
        }))
    }
}

#[test]
fn next_frame_waits_until_the_previous_pose_is_published() {
    let publishing = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let orchestrator = Arc::new(
        PoseOrchestrator::new(PipelineConfig::reference()).with_publisher(SlowPublisher {
            publishing: Arc::clone(&publishing),
        }),
    );
    orchestrator
        .start(&WatchfulFactory {
            publishing,
            overlaps: Arc::clone(&overlaps),
        })
        .expect("start");

    let workers: Vec<_> = (0..4u64)
        .map(|w| {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                for i in 0..4 {
                    orchestrator
                        .process_frame(&png_frame(w * 10 + i))
                        .expect("pose");
                }
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker");
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

/// Object detector that parks until released.
struct Gated {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Detector for Gated {
    fn detect(&mut self, _frame: &PreparedFrame) -> Result<Vec<RawDetection>, DetectorError> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        Ok(vec![dock_box()])
    }
}

struct GatedFactory {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl DetectorFactory for GatedFactory {
    fn load(&self, role: DetectorRole, _asset: &Path) -> Result<Box<dyn Detector>, DetectorError> {
        match role {
            DetectorRole::Object => Ok(Box::new(Gated {
                entered: self.entered.clone(),
                release: self.release.clone(),
            })),
            DetectorRole::Keypoint => Ok(Box::new(Scripted {
                output: keypoints(),
                calls: Arc::new(AtomicUsize::new(0)),
            })),
        }
    }
}

#[test]
fn stop_waits_for_the_frame_in_flight() {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let (pose_tx, pose_rx) = crossbeam_channel::bounded(1);
    let orchestrator =
        Arc::new(PoseOrchestrator::new(PipelineConfig::reference()).with_publisher(pose_tx));
    orchestrator
        .start(&GatedFactory {
            entered: entered_tx,
            release: release_rx,
        })
        .expect("start");

    let frame = {
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || orchestrator.process_frame(&png_frame(5)))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("frame reached detection");

    let stopper = {
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || orchestrator.stop())
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(orchestrator.state(), PipelineState::ShuttingDown);
    assert!(!stopper.is_finished());

    release_tx.send(()).expect("release");
    let pose = frame.join().expect("frame thread").expect("in-flight frame completes");
    stopper.join().expect("stop thread").expect("stop");

    assert_eq!(orchestrator.state(), PipelineState::Stopped);
    assert_eq!(pose_rx.try_recv().ok(), Some(pose));
    assert!(orchestrator.snapshot().is_empty());
}

#[test]
fn four_point_target_missing_a_class_never_solves() {
    let model = TargetModel::from_positions(&[
        [-1.0, -1.0, 0.0],
        [1.0, -1.0, 0.0],
        [1.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0],
    ])
    .expect("model");
    let camera = CameraIntrinsics::reference();
    let detections: Vec<_> = model
        .points()
        .iter()
        .filter(|p| p.class_index != 2)
        .map(|p| {
            let px = camera
                .project(&Point3::new(p.position.x, p.position.y, 5.0))
                .expect("in front");
            RawDetection::new(
                p.class_index as i64,
                0.9,
                BoundingBox {
                    center_x: px.x as f32,
                    center_y: px.y as f32,
                    width: 10.0,
                    height: 10.0,
                },
            )
        })
        .collect();

    let (tx, rx) = crossbeam_channel::bounded(1);
    let config = PipelineConfig {
        target: model,
        solver: SolverParams::default(),
        ..PipelineConfig::reference()
    };
    let orchestrator = PoseOrchestrator::new(config).with_publisher(tx);
    orchestrator
        .start(&MockFactory::new(detections))
        .expect("start");

    assert!(matches!(
        orchestrator.process_frame(&png_frame(1)),
        Err(FrameError::Incomplete {
            sequence: 1,
            present: 3,
            missing: 1
        })
    ));
    assert!(rx.try_recv().is_err());
    let pose_summary = orchestrator
        .snapshot()
        .get("Pose Detection Results")
        .map(|e| e.value.is_placeholder());
    assert_eq!(pose_summary, Some(true));
}
