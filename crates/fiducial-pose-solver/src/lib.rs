//! Keypoint detections to a relative target pose.
//!
//! The flow for one frame is:
//!
//! 1. [`DetectionAdapter`] keeps the top category of each raw detection and
//!    drops out-of-range or low-confidence entries.
//! 2. [`CorrespondenceBuilder`] indexes the survivors by target class and
//!    decides whether enough classes are present to solve.
//! 3. A [`PoseSolver`] (by default [`EpnpSolver`]) recovers rotation and
//!    translation of the target in the camera frame.
//!
//! [`TargetPoseEstimator`] runs all three.
//!
//! ```
//! use fiducial_pose_core::{CameraIntrinsics, TargetModel};
//! use fiducial_pose_solver::{SolverParams, TargetPoseEstimator};
//!
//! let estimator = TargetPoseEstimator::new(
//!     TargetModel::reference(),
//!     CameraIntrinsics::reference(),
//!     &SolverParams::default(),
//! )?;
//! assert!(estimator.estimate(0, &[]).is_err());
//! # Ok::<(), fiducial_pose_solver::EstimatorBuildError>(())
//! ```

mod correspondence;
mod detection;
mod epnp;
mod error;
mod estimator;
mod solver;

pub use correspondence::{
    CorrespondenceBuilder, CorrespondenceError, CorrespondenceSet, Correspondences,
    DuplicatePolicy,
};
pub use detection::{BoundingBox, Category, DetectionAdapter, DetectionObservation, RawDetection};
pub use epnp::{solve_epnp, EpnpParams, PnpSolution};
pub use error::PnpError;
pub use estimator::{EstimateError, EstimatorBuildError, SolverParams, TargetPoseEstimator};
pub use solver::{solve_pnp, EpnpSolver, PoseEstimate, PoseSolver};
