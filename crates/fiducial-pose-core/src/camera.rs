//! Pinhole camera with Brown–Conrady (k1, k2, p1, p2) distortion.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

/// Radial (`k1`, `k2`) and tangential (`p1`, `p2`) distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

impl Distortion {
    pub const NONE: Distortion = Distortion {
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
    };

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    fn is_finite(&self) -> bool {
        self.k1.is_finite() && self.k2.is_finite() && self.p1.is_finite() && self.p2.is_finite()
    }

    /// Apply the distortion to an ideal normalized point.
    #[inline]
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }

    /// Invert `distort` by fixed-point iteration.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let inv_radial = 1.0 / (1.0 + self.k1 * r2 + self.k2 * r2 * r2);
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - dx) * inv_radial;
            y = (yd - dy) * inv_radial;
        }
        (x, y)
    }
}

/// Camera validation errors.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CameraError {
    #[error("focal lengths must be finite and > 0 (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("principal point must be finite (cx={cx}, cy={cy})")]
    InvalidPrincipalPoint { cx: f64, cy: f64 },
    #[error("distortion coefficients must be finite")]
    InvalidDistortion,
}

/// Intrinsic calibration of the monocular camera.
///
/// Immutable once built; deserialization goes through the same validation
/// as [`CameraIntrinsics::new`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntrinsicsRepr", into = "IntrinsicsRepr")]
pub struct CameraIntrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    distortion: Distortion,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct IntrinsicsRepr {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    #[serde(default)]
    distortion: Distortion,
}

impl TryFrom<IntrinsicsRepr> for CameraIntrinsics {
    type Error = CameraError;

    fn try_from(r: IntrinsicsRepr) -> Result<Self, Self::Error> {
        CameraIntrinsics::new(r.fx, r.fy, r.cx, r.cy, r.distortion)
    }
}

impl From<CameraIntrinsics> for IntrinsicsRepr {
    fn from(c: CameraIntrinsics) -> Self {
        IntrinsicsRepr {
            fx: c.fx,
            fy: c.fy,
            cx: c.cx,
            cy: c.cy,
            distortion: c.distortion,
        }
    }
}

impl CameraIntrinsics {
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        distortion: Distortion,
    ) -> Result<Self, CameraError> {
        if !fx.is_finite() || !fy.is_finite() || fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::InvalidFocalLength { fx, fy });
        }
        if !cx.is_finite() || !cy.is_finite() {
            return Err(CameraError::InvalidPrincipalPoint { cx, cy });
        }
        if !distortion.is_finite() {
            return Err(CameraError::InvalidDistortion);
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            distortion,
        })
    }

    /// Distortion-free camera.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CameraError> {
        Self::new(fx, fy, cx, cy, Distortion::NONE)
    }

    /// Dock camera calibration used by the reference configuration.
    pub fn reference() -> Self {
        Self {
            fx: 900.0,
            fy: 900.0,
            cx: 525.0,
            cy: 600.0,
            distortion: Distortion::NONE,
        }
    }

    #[inline]
    pub fn fx(&self) -> f64 {
        self.fx
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.fy
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.cx
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.cy
    }

    #[inline]
    pub fn distortion(&self) -> Distortion {
        self.distortion
    }

    #[inline]
    pub fn has_distortion(&self) -> bool {
        !self.distortion.is_zero()
    }

    /// The 3×3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-frame point to pixels, applying distortion.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z.is_nan() || p.z <= 0.0 || !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        Some(self.denormalize(&Point2::new(p.x / p.z, p.y / p.z)))
    }

    /// Map an ideal normalized point (`x/z`, `y/z`) to distorted pixels.
    pub fn denormalize(&self, n: &Point2<f64>) -> Point2<f64> {
        let (xd, yd) = if self.has_distortion() {
            self.distortion.distort(n.x, n.y)
        } else {
            (n.x, n.y)
        };
        Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy)
    }

    /// Map a distorted pixel to ideal normalized coordinates.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let xd = (pixel.x - self.cx) / self.fx;
        let yd = (pixel.y - self.cy) / self.fy;
        if !self.has_distortion() {
            return Point2::new(xd, yd);
        }
        let (x, y) = self.distortion.undistort(xd, yd);
        Point2::new(x, y)
    }
}
