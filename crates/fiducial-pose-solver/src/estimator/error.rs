use crate::correspondence::CorrespondenceError;
use crate::error::PnpError;

/// Why a frame produced no pose.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimateError {
    #[error("no usable detections")]
    NoDetections,
    #[error("{present} target classes present, {missing} missing")]
    Incomplete { present: usize, missing: usize },
    #[error(transparent)]
    Solve(#[from] PnpError),
}

/// Estimator construction errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimatorBuildError {
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error("min_score must be finite and in [0, 1], got {0}")]
    InvalidMinScore(f32),
}
