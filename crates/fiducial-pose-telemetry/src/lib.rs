//! Telemetry aggregation for the fiducial pose pipeline.
//!
//! Signals arrive independently from many producers. Each is stored in its
//! own [`TelemetryChannel`]; [`TelemetryAggregator::snapshot`] copies them all
//! into an ordered [`TelemetrySnapshot`] once the [`ReadinessGate`] is open.
//!
//! ```
//! use fiducial_pose_telemetry::TelemetryAggregator;
//!
//! let telemetry = TelemetryAggregator::standard();
//! telemetry.write("/simulinkphase", 3_i64)?;
//! assert!(telemetry.snapshot().is_empty());
//!
//! telemetry.gate().open();
//! let snap = telemetry.snapshot();
//! assert_eq!(snap.get("Phase").map(|e| e.ready), Some(true));
//! # Ok::<(), fiducial_pose_telemetry::TelemetryError>(())
//! ```

mod aggregator;
mod channel;
mod error;
mod gate;
mod registry;
mod reporter;
mod snapshot;

pub use aggregator::TelemetryAggregator;
pub use channel::{ChannelValue, TelemetryChannel, ValueKind};
pub use error::TelemetryError;
pub use gate::ReadinessGate;
pub use registry::{
    ChannelKind, ChannelSpec, TelemetryRegistry, MAX_BYTE_PAYLOAD, OBJECT_DETECTION_CHANNEL,
    POSE_DETECTION_CHANNEL,
};
pub use reporter::SnapshotReporter;
pub use snapshot::{SnapshotEntry, SnapshotValue, TelemetrySnapshot};
