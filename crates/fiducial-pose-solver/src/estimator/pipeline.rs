use std::sync::Arc;

use fiducial_pose_core::{CameraIntrinsics, TargetModel};

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::{EstimateError, EstimatorBuildError, SolverParams};
use crate::correspondence::{CorrespondenceBuilder, Correspondences};
use crate::detection::{DetectionAdapter, RawDetection};
use crate::solver::{EpnpSolver, PoseEstimate, PoseSolver};

/// Raw detections in, relative pose out.
pub struct TargetPoseEstimator {
    model: TargetModel,
    camera: CameraIntrinsics,
    adapter: DetectionAdapter,
    builder: CorrespondenceBuilder,
    solver: Arc<dyn PoseSolver>,
}

impl TargetPoseEstimator {
    /// Estimator backed by [`EpnpSolver`].
    pub fn new(
        model: TargetModel,
        camera: CameraIntrinsics,
        params: &SolverParams,
    ) -> Result<Self, EstimatorBuildError> {
        let solver = Arc::new(EpnpSolver::new(params.epnp.clone()));
        Self::with_solver(model, camera, params, solver)
    }

    /// Estimator using a caller-supplied solver.
    pub fn with_solver(
        model: TargetModel,
        camera: CameraIntrinsics,
        params: &SolverParams,
        solver: Arc<dyn PoseSolver>,
    ) -> Result<Self, EstimatorBuildError> {
        if !params.min_score.is_finite() || !(0.0..=1.0).contains(&params.min_score) {
            return Err(EstimatorBuildError::InvalidMinScore(params.min_score));
        }
        let min = params.min_correspondences.unwrap_or(model.len());
        let builder = CorrespondenceBuilder::new(&model, min, params.duplicate_policy)?;
        let adapter = DetectionAdapter::new(model.len(), params.min_score);
        Ok(Self {
            model,
            camera,
            adapter,
            builder,
            solver,
        })
    }

    #[inline]
    pub fn model(&self) -> &TargetModel {
        &self.model
    }

    #[inline]
    pub fn camera(&self) -> &CameraIntrinsics {
        &self.camera
    }

    #[inline]
    pub fn min_correspondences(&self) -> usize {
        self.builder.min_correspondences()
    }

    /// Estimate the target pose from one frame's raw detections.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, raw), fields(detections = raw.len()))
    )]
    pub fn estimate(
        &self,
        sequence: u64,
        raw: &[RawDetection],
    ) -> Result<PoseEstimate, EstimateError> {
        let observations = self.adapter.adapt(sequence, raw);
        if observations.is_empty() {
            return Err(EstimateError::NoDetections);
        }

        let set = match self.builder.build(sequence, &observations) {
            Correspondences::Ready(set) => set,
            Correspondences::Incomplete { present, missing } => {
                return Err(EstimateError::Incomplete { present, missing });
            }
        };

        let pose = self
            .solver
            .solve(sequence, &set, &self.model, &self.camera)
            .inspect_err(|e| log::warn!("frame {sequence}: pose solve failed: {e}"))?;
        Ok(pose)
    }
}
