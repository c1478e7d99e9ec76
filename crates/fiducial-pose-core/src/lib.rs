//! Core types shared by the fiducial pose pipeline.
//!
//! This crate is small and purely geometric: a pinhole camera with
//! Brown–Conrady distortion and the fixed 3D layout of the fiducial target.
//! It does *not* know about detectors, solvers, or telemetry.

mod camera;
mod logger;
mod target;

pub use camera::{CameraError, CameraIntrinsics, Distortion};
pub use target::{
    TargetModel, TargetModelError, TargetPoint, MIN_TARGET_POINTS, REFERENCE_TARGET_POINTS,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{
    component_of, init_with_filter, init_with_level, parse_level_filter, LogFilter,
};
