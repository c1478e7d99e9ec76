//! Per-frame pose estimation.
//!
//! This module wires the detection adapter, the class correspondence builder,
//! and a [`PoseSolver`](crate::PoseSolver) into a single call.

mod error;
mod params;
mod pipeline;

pub use error::{EstimateError, EstimatorBuildError};
pub use params::SolverParams;
pub use pipeline::TargetPoseEstimator;
