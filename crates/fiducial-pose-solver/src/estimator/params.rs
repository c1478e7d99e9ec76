use serde::{Deserialize, Serialize};

use crate::correspondence::DuplicatePolicy;
use crate::epnp::EpnpParams;

/// Configuration for [`TargetPoseEstimator`](super::TargetPoseEstimator).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Classes required before solving. `None` means every class of the
    /// target.
    pub min_correspondences: Option<usize>,
    /// Resolution of several detections for the same class.
    pub duplicate_policy: DuplicatePolicy,
    /// Detections scoring below this are discarded.
    pub min_score: f32,
    pub epnp: EpnpParams,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            min_correspondences: None,
            duplicate_policy: DuplicatePolicy::HighestScore,
            min_score: 0.5,
            epnp: EpnpParams::default(),
        }
    }
}
