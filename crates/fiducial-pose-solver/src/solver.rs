//! Pose solver seam and the EPnP-backed implementation.

use std::time::SystemTime;

use fiducial_pose_core::{CameraIntrinsics, TargetModel};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::correspondence::CorrespondenceSet;
use crate::epnp::{solve_epnp, EpnpParams, PnpSolution};
use crate::error::PnpError;

/// Relative pose of the target in the camera frame for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Axis-angle rotation, radians.
    pub rotation: Vector3<f64>,
    /// Target origin in the camera frame, same units as the target model.
    pub translation: Vector3<f64>,
    pub sequence: u64,
    /// When the solve finished.
    pub computed_at: SystemTime,
    /// When the source frame was captured, if known.
    #[serde(default)]
    pub captured_at: Option<SystemTime>,
    /// Number of correspondences used.
    pub correspondences: usize,
    pub reprojection_rmse_px: f64,
}

impl PoseEstimate {
    pub fn with_capture_time(mut self, captured_at: SystemTime) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    /// Rotation as a matrix.
    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rotation)
    }

    /// `[x, y, z, w]` quaternion of the rotation.
    pub fn quaternion_xyzw(&self) -> [f64; 4] {
        let q = nalgebra::UnitQuaternion::from_scaled_axis(self.rotation);
        [q.i, q.j, q.k, q.w]
    }
}

/// Anything that turns a correspondence set into a pose.
pub trait PoseSolver: Send + Sync {
    fn solve(
        &self,
        sequence: u64,
        correspondences: &CorrespondenceSet,
        model: &TargetModel,
        camera: &CameraIntrinsics,
    ) -> Result<PoseEstimate, PnpError>;
}

/// [`PoseSolver`] using EPnP.
#[derive(Clone, Debug, Default)]
pub struct EpnpSolver {
    params: EpnpParams,
}

impl EpnpSolver {
    pub fn new(params: EpnpParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EpnpParams {
        &self.params
    }
}

impl PoseSolver for EpnpSolver {
    fn solve(
        &self,
        sequence: u64,
        correspondences: &CorrespondenceSet,
        model: &TargetModel,
        camera: &CameraIntrinsics,
    ) -> Result<PoseEstimate, PnpError> {
        let (object, pixels) = correspondences.point_pairs(model);
        let (solution, rmse_px) = solve_pixels(&object, &pixels, camera, &self.params)?;

        log::debug!(
            "frame {sequence}: pose t=[{:.4}, {:.4}, {:.4}] r=[{:.4}, {:.4}, {:.4}] rmse {:.3}px",
            solution.translation.x,
            solution.translation.y,
            solution.translation.z,
            solution.rvec.x,
            solution.rvec.y,
            solution.rvec.z,
            rmse_px
        );

        Ok(PoseEstimate {
            rotation: solution.rvec,
            translation: solution.translation,
            sequence,
            computed_at: SystemTime::now(),
            captured_at: None,
            correspondences: object.len(),
            reprojection_rmse_px: rmse_px,
        })
    }
}

/// EPnP on pixel observations.
///
/// Pixels are normalized through `camera` (distortion included) before the
/// solve. Returns the solution and its RMS reprojection error in pixels.
pub fn solve_pnp(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    camera: &CameraIntrinsics,
    params: &EpnpParams,
) -> Result<PnpSolution, PnpError> {
    solve_pixels(object, pixels, camera, params).map(|(s, _)| s)
}

fn solve_pixels(
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    camera: &CameraIntrinsics,
    params: &EpnpParams,
) -> Result<(PnpSolution, f64), PnpError> {
    if let Some(index) = pixels
        .iter()
        .position(|p| !(p.x.is_finite() && p.y.is_finite()))
    {
        return Err(PnpError::NonFinite { index });
    }
    let normalized: Vec<Point2<f64>> = pixels.iter().map(|p| camera.normalize(p)).collect();
    let solution = solve_epnp(object, &normalized, params)?;
    let rmse_px = pixel_rmse(&solution, object, pixels, camera);
    Ok((solution, rmse_px))
}

fn pixel_rmse(
    solution: &PnpSolution,
    object: &[Point3<f64>],
    pixels: &[Point2<f64>],
    camera: &CameraIntrinsics,
) -> f64 {
    let mut sq = 0.0;
    for (p, px) in object.iter().zip(pixels) {
        let pc = Point3::from(solution.rotation * p.coords + solution.translation);
        match camera.project(&pc) {
            Some(proj) => sq += (proj - px).norm_squared(),
            None => return f64::INFINITY,
        }
    }
    (sq / object.len().max(1) as f64).sqrt()
}
