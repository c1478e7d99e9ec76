//! Fixed 3D geometry of the fiducial target.
//!
//! Every detectable keypoint class maps to exactly one 3D point in the
//! target frame (meters). Class indices are dense over `[0, N)`.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Keypoint layout of the reference target, indexed by class.
///
/// Classes 4 and 5 share a location on the physical target.
pub const REFERENCE_TARGET_POINTS: [[f64; 3]; 8] = [
    [-0.148048, -0.125818, 0.099267],
    [0.133917, -0.112317, -0.156238],
    [-0.120165, 0.106573, -0.114485],
    [0.133836, 0.142346, 0.141878],
    [-0.137991, -0.152850, -0.155571],
    [-0.137991, -0.152850, -0.155571],
    [-0.148946, 0.137467, 0.138683],
    [-0.140832, -0.147009, 0.142015],
];

/// Smallest target a perspective-n-point solve can use.
pub const MIN_TARGET_POINTS: usize = 4;

/// One keypoint of the target model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub class_index: usize,
    /// Position in the target frame, meters.
    pub position: Point3<f64>,
}

/// Target model validation errors.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TargetModelError {
    #[error("target needs at least {min} points, got {got}")]
    TooFewPoints { min: usize, got: usize },
    #[error("class index {class_index} appears more than once")]
    DuplicateClass { class_index: usize },
    #[error("class index {class_index} is outside [0, {len})")]
    ClassOutOfRange { class_index: usize, len: usize },
    #[error("class index {class_index} has a non-finite position")]
    NonFinitePoint { class_index: usize },
}

/// Validated target model, points stored in class order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TargetPoint>", into = "Vec<TargetPoint>")]
pub struct TargetModel {
    points: Vec<TargetPoint>,
}

impl TryFrom<Vec<TargetPoint>> for TargetModel {
    type Error = TargetModelError;

    fn try_from(points: Vec<TargetPoint>) -> Result<Self, Self::Error> {
        TargetModel::new(points)
    }
}

impl From<TargetModel> for Vec<TargetPoint> {
    fn from(model: TargetModel) -> Self {
        model.points
    }
}

impl TargetModel {
    /// Validate and create a model. Input order is irrelevant; class indices
    /// must be unique and cover `[0, N)`.
    pub fn new(mut points: Vec<TargetPoint>) -> Result<Self, TargetModelError> {
        let len = points.len();
        if len < MIN_TARGET_POINTS {
            return Err(TargetModelError::TooFewPoints {
                min: MIN_TARGET_POINTS,
                got: len,
            });
        }

        let mut seen = vec![false; len];
        for p in &points {
            if p.class_index >= len {
                return Err(TargetModelError::ClassOutOfRange {
                    class_index: p.class_index,
                    len,
                });
            }
            if std::mem::replace(&mut seen[p.class_index], true) {
                return Err(TargetModelError::DuplicateClass {
                    class_index: p.class_index,
                });
            }
            if !p.position.coords.iter().all(|v| v.is_finite()) {
                return Err(TargetModelError::NonFinitePoint {
                    class_index: p.class_index,
                });
            }
        }

        points.sort_unstable_by_key(|p| p.class_index);
        Ok(Self { points })
    }

    /// Build a model where the class index is the position in `positions`.
    pub fn from_positions(positions: &[[f64; 3]]) -> Result<Self, TargetModelError> {
        Self::new(
            positions
                .iter()
                .enumerate()
                .map(|(class_index, &[x, y, z])| TargetPoint {
                    class_index,
                    position: Point3::new(x, y, z),
                })
                .collect(),
        )
    }

    /// The eight-keypoint reference target.
    pub fn reference() -> Self {
        Self {
            points: REFERENCE_TARGET_POINTS
                .iter()
                .enumerate()
                .map(|(class_index, &[x, y, z])| TargetPoint {
                    class_index,
                    position: Point3::new(x, y, z),
                })
                .collect(),
        }
    }

    /// Number of classes `N`.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 3D position for a class index.
    #[inline]
    pub fn position(&self, class_index: usize) -> Option<Point3<f64>> {
        self.points.get(class_index).map(|p| p.position)
    }

    /// Points in class order.
    #[inline]
    pub fn points(&self) -> &[TargetPoint] {
        &self.points
    }
}
