//! Normalization of raw keypoint-detector output.
//!
//! The detector reports axis-aligned boxes with a list of scored categories.
//! The adapter keeps the top-scoring category of each box and turns it into a
//! [`DetectionObservation`] whose center is the keypoint location.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// One scored label of a raw detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Class index as reported by the model. May be negative or out of range.
    pub index: i64,
    #[serde(default)]
    pub label: String,
    pub score: f32,
}

/// Axis-aligned box in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build from `left, top, right, bottom` edges.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            center_x: 0.5 * (left + right),
            center_y: 0.5 * (top + bottom),
            width: right - left,
            height: bottom - top,
        }
    }

    #[inline]
    fn is_finite(&self) -> bool {
        self.center_x.is_finite()
            && self.center_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }
}

/// Detector output for one instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub categories: Vec<Category>,
    pub bbox: BoundingBox,
}

impl RawDetection {
    /// Single-category detection.
    pub fn new(index: i64, score: f32, bbox: BoundingBox) -> Self {
        Self {
            categories: vec![Category {
                index,
                label: String::new(),
                score,
            }],
            bbox,
        }
    }

    /// Highest-scoring category; ties keep the first one reported.
    pub fn top_category(&self) -> Option<&Category> {
        self.categories.iter().fold(None, |best, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        })
    }
}

/// A keypoint observation for one target class in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionObservation {
    pub class_index: usize,
    pub score: f32,
    /// Box center in pixels.
    pub center: Point2<f64>,
    /// Box `[width, height]` in pixels.
    pub extent: [f64; 2],
}

/// Converts raw detections into per-class observations for an `N`-class target.
#[derive(Clone, Debug)]
pub struct DetectionAdapter {
    num_classes: usize,
    min_score: f32,
}

impl DetectionAdapter {
    pub fn new(num_classes: usize, min_score: f32) -> Self {
        Self {
            num_classes,
            min_score,
        }
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Adapt one frame worth of detections.
    ///
    /// Invalid detections are dropped with a diagnostic; the rest are returned
    /// in input order.
    pub fn adapt(&self, sequence: u64, raw: &[RawDetection]) -> Vec<DetectionObservation> {
        let mut out = Vec::with_capacity(raw.len());
        for det in raw {
            let Some(category) = det.top_category() else {
                log::warn!("frame {sequence}: detection without categories dropped");
                continue;
            };
            let class_index = match usize::try_from(category.index) {
                Ok(c) if c < self.num_classes => c,
                _ => {
                    log::warn!(
                        "frame {sequence}: class index {} outside [0, {}), detection dropped",
                        category.index,
                        self.num_classes
                    );
                    continue;
                }
            };
            if !category.score.is_finite() || category.score < self.min_score {
                log::debug!(
                    "frame {sequence}: class {class_index} score {} below {}, dropped",
                    category.score,
                    self.min_score
                );
                continue;
            }
            if !det.bbox.is_finite() {
                log::warn!("frame {sequence}: class {class_index} has a non-finite box, dropped");
                continue;
            }

            out.push(DetectionObservation {
                class_index,
                score: category.score,
                center: Point2::new(det.bbox.center_x as f64, det.bbox.center_y as f64),
                extent: [det.bbox.width as f64, det.bbox.height as f64],
            });
        }

        log::debug!(
            "frame {sequence}: {} of {} detections kept",
            out.len(),
            raw.len()
        );
        out
    }
}
