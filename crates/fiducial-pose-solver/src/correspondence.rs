//! Class-indexed 2D–3D correspondences for one frame.

use fiducial_pose_core::{TargetModel, MIN_TARGET_POINTS};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionObservation;

/// What to do when several observations claim the same class in one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the observation with the highest score.
    #[default]
    HighestScore,
    /// Keep the observation reported last.
    LastWins,
}

/// Builder configuration errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrespondenceError {
    #[error("minimum correspondences must be in [{min}, {max}], got {got}")]
    InvalidMinimum { min: usize, max: usize, got: usize },
}

/// Per-frame table of at most one observation per target class.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrespondenceSet {
    slots: Box<[Option<DetectionObservation>]>,
}

impl CorrespondenceSet {
    fn empty(num_classes: usize) -> Self {
        Self {
            slots: vec![None; num_classes].into_boxed_slice(),
        }
    }

    /// Target cardinality `N`.
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.slots.len()
    }

    /// Number of classes with an observation.
    pub fn present(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[inline]
    pub fn missing(&self) -> usize {
        self.num_classes() - self.present()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    #[inline]
    pub fn get(&self, class_index: usize) -> Option<&DetectionObservation> {
        self.slots.get(class_index)?.as_ref()
    }

    /// Present observations in ascending class order.
    pub fn iter(&self) -> impl Iterator<Item = &DetectionObservation> + '_ {
        self.slots.iter().flatten()
    }

    /// Object and image points paired index-for-index, in class order.
    pub fn point_pairs(&self, model: &TargetModel) -> (Vec<Point3<f64>>, Vec<Point2<f64>>) {
        self.iter()
            .filter_map(|obs| Some((model.position(obs.class_index)?, obs.center)))
            .unzip()
    }
}

/// Result of indexing a frame's observations.
#[derive(Clone, Debug, PartialEq)]
pub enum Correspondences {
    /// Enough classes to attempt a solve.
    Ready(CorrespondenceSet),
    /// Fewer classes than the configured minimum.
    Incomplete { present: usize, missing: usize },
}

/// Indexes observations by class and gates on the minimum class count.
#[derive(Clone, Debug)]
pub struct CorrespondenceBuilder {
    num_classes: usize,
    min_correspondences: usize,
    policy: DuplicatePolicy,
}

impl CorrespondenceBuilder {
    /// Builder that requires every class of `model`.
    pub fn for_model(model: &TargetModel) -> Self {
        Self {
            num_classes: model.len(),
            min_correspondences: model.len(),
            policy: DuplicatePolicy::default(),
        }
    }

    /// Builder with an explicit minimum in `[4, N]`.
    pub fn new(
        model: &TargetModel,
        min_correspondences: usize,
        policy: DuplicatePolicy,
    ) -> Result<Self, CorrespondenceError> {
        let max = model.len();
        if !(MIN_TARGET_POINTS..=max).contains(&min_correspondences) {
            return Err(CorrespondenceError::InvalidMinimum {
                min: MIN_TARGET_POINTS,
                max,
                got: min_correspondences,
            });
        }
        Ok(Self {
            num_classes: max,
            min_correspondences,
            policy,
        })
    }

    #[inline]
    pub fn min_correspondences(&self) -> usize {
        self.min_correspondences
    }

    #[inline]
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn build(&self, sequence: u64, observations: &[DetectionObservation]) -> Correspondences {
        let mut set = CorrespondenceSet::empty(self.num_classes);

        for obs in observations {
            let Some(slot) = set.slots.get_mut(obs.class_index) else {
                log::warn!(
                    "frame {sequence}: class index {} outside [0, {}), ignored",
                    obs.class_index,
                    self.num_classes
                );
                continue;
            };
            match slot {
                Some(prev) => {
                    let replace = match self.policy {
                        DuplicatePolicy::LastWins => true,
                        DuplicatePolicy::HighestScore => obs.score > prev.score,
                    };
                    log::debug!(
                        "frame {sequence}: duplicate class {} (scores {} / {}), {}",
                        obs.class_index,
                        prev.score,
                        obs.score,
                        if replace { "replaced" } else { "kept first" }
                    );
                    if replace {
                        *prev = *obs;
                    }
                }
                None => *slot = Some(*obs),
            }
        }

        let present = set.present();
        if present < self.min_correspondences {
            let missing = self.num_classes - present;
            log::info!(
                "frame {sequence}: {present} of {} classes present (need {}), skipping solve",
                self.num_classes,
                self.min_correspondences
            );
            return Correspondences::Incomplete { present, missing };
        }
        Correspondences::Ready(set)
    }
}
