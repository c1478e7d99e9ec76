//! Efficient Perspective-n-Point (EPnP).
//!
//! Object points are expressed as barycentric combinations of a few control
//! points. Their camera-frame coordinates live in the null space of a linear
//! system built from the normalized image observations; the right combination
//! of null-space vectors is picked by preserving inter-control-point distances.
//! Pose is then recovered by absolute orientation (Kabsch).
//!
//! Planar targets use three control points, everything else uses four.

use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::PnpError;

const EIGEN_MAX_ITERS: usize = 1000;
const SVD_MAX_ITERS: usize = 1000;
const SOLVE_EPS: f64 = 1e-12;
const MIN_BETA_SQ: f64 = 1e-18;
/// Second principal variance below this fraction of the first means collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-10;
/// Points closer than this fraction of the target extent count as one.
const DISTINCT_TOLERANCE: f64 = 1e-9;

/// Tuning for [`solve_epnp`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EpnpParams {
    /// Third principal variance, relative to the first, below which the
    /// object points are treated as planar.
    pub planarity_tolerance: f64,
    /// Gauss–Newton iterations applied to each linearized candidate.
    pub refine_iterations: usize,
}

impl Default for EpnpParams {
    fn default() -> Self {
        Self {
            planarity_tolerance: 1e-6,
            refine_iterations: 5,
        }
    }
}

/// Camera-from-object transform produced by EPnP.
#[derive(Clone, Debug, PartialEq)]
pub struct PnpSolution {
    pub rotation: Matrix3<f64>,
    /// Axis-angle of `rotation`, radians.
    pub rvec: Vector3<f64>,
    pub translation: Vector3<f64>,
    /// RMS reprojection error on the normalized image plane.
    pub reprojection_rmse: f64,
}

/// Solve for the pose of `object` points seen at `image` points.
///
/// `image` must already be normalized (undistorted, `K⁻¹` applied). Pairs are
/// matched by index.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(points = object.len()))
)]
pub fn solve_epnp(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    params: &EpnpParams,
) -> Result<PnpSolution, PnpError> {
    validate(object, image)?;

    let frame = ControlFrame::fit(object, params.planarity_tolerance)?;
    let alphas: Vec<Vec<f64>> = object.iter().map(|p| frame.alphas(p)).collect();
    let k = frame.num_controls();

    let m = build_m(&alphas, image, k);
    let kernel = kernel_vectors(&m, if k == 4 { 4 } else { 3 })?;
    let pairs = frame.control_pairs();
    let max_dim = if k == 4 { 3 } else { 2 };

    let mut best: Option<PnpSolution> = None;
    for dim in 1..=max_dim {
        let Some(initial) = linearized_betas(&kernel[..dim], &pairs)? else {
            continue;
        };
        let refined = refine_betas(
            initial.clone(),
            &kernel[..dim],
            &pairs,
            params.refine_iterations,
        )?;
        for betas in [initial, refined] {
            let Some(candidate) = pose_from_betas(&betas, &kernel, &alphas, object, image)? else {
                continue;
            };
            log::trace!(
                "epnp candidate dim {dim}: rmse {:.3e}",
                candidate.reprojection_rmse
            );
            if best
                .as_ref()
                .is_none_or(|b| candidate.reprojection_rmse < b.reprojection_rmse)
            {
                best = Some(candidate);
            }
        }
    }

    let solution = best.ok_or(PnpError::Degenerate("no pose candidate in front of the camera"))?;
    log::debug!(
        "epnp: {} points, {} control points, rmse {:.3e}",
        object.len(),
        k,
        solution.reprojection_rmse
    );
    Ok(solution)
}

fn validate(object: &[Point3<f64>], image: &[Point2<f64>]) -> Result<(), PnpError> {
    if object.len() != image.len() {
        return Err(PnpError::MismatchedLengths {
            object: object.len(),
            image: image.len(),
        });
    }
    if object.len() < 4 {
        return Err(PnpError::InsufficientCorrespondences {
            required: 4,
            actual: object.len(),
        });
    }
    for (index, (o, i)) in object.iter().zip(image).enumerate() {
        if !(o.coords.iter().all(|v| v.is_finite()) && i.coords.iter().all(|v| v.is_finite())) {
            return Err(PnpError::NonFinite { index });
        }
    }
    if distinct_points(object) < 4 {
        return Err(PnpError::Degenerate("fewer than four distinct object points"));
    }
    Ok(())
}

/// Number of object points that do not coincide with an earlier one.
fn distinct_points(object: &[Point3<f64>]) -> usize {
    let extent = object
        .iter()
        .map(|p| (p - object[0]).norm())
        .fold(0.0, f64::max);
    let tol_sq = (DISTINCT_TOLERANCE * extent).powi(2);
    object
        .iter()
        .enumerate()
        .filter(|&(i, p)| {
            object[..i]
                .iter()
                .all(|q| (p - q).norm_squared() > tol_sq)
        })
        .count()
}

/// Control points `c0` (centroid) and `c0 + a_j` along the principal axes.
struct ControlFrame {
    origin: Vector3<f64>,
    axes: Vec<Vector3<f64>>,
}

impl ControlFrame {
    fn fit(object: &[Point3<f64>], planarity_tolerance: f64) -> Result<Self, PnpError> {
        let n = object.len() as f64;
        let origin = object.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;

        let mut cov = Matrix3::<f64>::zeros();
        for p in object {
            let d = p.coords - origin;
            cov += d * d.transpose();
        }

        let eig = cov
            .try_symmetric_eigen(f64::EPSILON, EIGEN_MAX_ITERS)
            .ok_or(PnpError::NonConvergent("object covariance eigen decomposition"))?;
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let lambda = order.map(|i| eig.eigenvalues[i].max(0.0));

        if lambda[0] <= 0.0 {
            return Err(PnpError::Degenerate("object points coincide"));
        }
        if lambda[1] <= COLLINEAR_TOLERANCE * lambda[0] {
            return Err(PnpError::Degenerate("object points are collinear"));
        }
        let planar = lambda[2] <= planarity_tolerance * lambda[0];
        let used = if planar { 2 } else { 3 };

        let axes = order[..used]
            .iter()
            .zip(&lambda)
            .map(|(&i, &l)| eig.eigenvectors.column(i).into_owned() * (l / n).sqrt())
            .collect();
        Ok(Self { origin, axes })
    }

    #[inline]
    fn num_controls(&self) -> usize {
        self.axes.len() + 1
    }

    fn control(&self, j: usize) -> Vector3<f64> {
        match j {
            0 => self.origin,
            _ => self.origin + self.axes[j - 1],
        }
    }

    /// Barycentric weights of `p`; they sum to one.
    fn alphas(&self, p: &Point3<f64>) -> Vec<f64> {
        let d = p.coords - self.origin;
        let mut out = Vec::with_capacity(self.num_controls());
        out.push(0.0);
        for a in &self.axes {
            out.push(d.dot(a) / a.norm_squared());
        }
        out[0] = 1.0 - out[1..].iter().sum::<f64>();
        out
    }

    /// Every control-point pair with its squared world distance.
    fn control_pairs(&self) -> Vec<(usize, usize, f64)> {
        let k = self.num_controls();
        let mut out = Vec::with_capacity(k * (k - 1) / 2);
        for i in 0..k {
            for j in i + 1..k {
                out.push((i, j, (self.control(i) - self.control(j)).norm_squared()));
            }
        }
        out
    }
}

/// `2n x 3k` system whose null space holds the camera-frame control points.
fn build_m(alphas: &[Vec<f64>], image: &[Point2<f64>], k: usize) -> DMatrix<f64> {
    let mut m = DMatrix::<f64>::zeros(2 * image.len(), 3 * k);
    for (i, (alpha, uv)) in alphas.iter().zip(image).enumerate() {
        for (j, &a) in alpha.iter().enumerate() {
            m[(2 * i, 3 * j)] = a;
            m[(2 * i, 3 * j + 2)] = -a * uv.x;
            m[(2 * i + 1, 3 * j + 1)] = a;
            m[(2 * i + 1, 3 * j + 2)] = -a * uv.y;
        }
    }
    m
}

/// Eigenvectors of `MᵀM` for the `count` smallest eigenvalues, ascending.
fn kernel_vectors(m: &DMatrix<f64>, count: usize) -> Result<Vec<DVector<f64>>, PnpError> {
    let mtm = m.tr_mul(m);
    if !mtm.iter().all(|v| v.is_finite()) {
        return Err(PnpError::Degenerate("image coordinates overflow the linear system"));
    }
    let eig = mtm
        .try_symmetric_eigen(f64::EPSILON, EIGEN_MAX_ITERS)
        .ok_or(PnpError::NonConvergent("MtM eigen decomposition"))?;
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let kernel: Vec<DVector<f64>> = order
        .into_iter()
        .take(count)
        .map(|i| eig.eigenvectors.column(i).into_owned())
        .collect();
    if !kernel.iter().all(|v| v.iter().all(|x| x.is_finite())) {
        return Err(PnpError::Degenerate("non-finite null space"));
    }
    Ok(kernel)
}

#[inline]
fn control_delta(v: &DVector<f64>, i: usize, j: usize) -> Vector3<f64> {
    Vector3::new(
        v[3 * i] - v[3 * j],
        v[3 * i + 1] - v[3 * j + 1],
        v[3 * i + 2] - v[3 * j + 2],
    )
}

/// Closed-form betas from the distance constraints, linearized in `β_a β_b`.
fn linearized_betas(
    kernel: &[DVector<f64>],
    pairs: &[(usize, usize, f64)],
) -> Result<Option<Vec<f64>>, PnpError> {
    let dim = kernel.len();
    let mut unknowns = Vec::with_capacity(dim * (dim + 1) / 2);
    for a in 0..dim {
        for b in a..dim {
            unknowns.push((a, b));
        }
    }
    if pairs.len() < unknowns.len() {
        return Ok(None);
    }

    let mut l = DMatrix::<f64>::zeros(pairs.len(), unknowns.len());
    let mut rho = DVector::<f64>::zeros(pairs.len());
    for (row, &(i, j, d2)) in pairs.iter().enumerate() {
        let deltas: Vec<Vector3<f64>> = kernel.iter().map(|v| control_delta(v, i, j)).collect();
        for (col, &(a, b)) in unknowns.iter().enumerate() {
            l[(row, col)] = if a == b {
                deltas[a].norm_squared()
            } else {
                2.0 * deltas[a].dot(&deltas[b])
            };
        }
        rho[row] = d2;
    }

    let svd = l
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERS)
        .ok_or(PnpError::NonConvergent("beta linearization SVD"))?;
    let Ok(products) = svd.solve(&rho, SOLVE_EPS) else {
        return Ok(None);
    };
    let b0_sq = products[0].abs();
    if !(b0_sq >= MIN_BETA_SQ && b0_sq.is_finite()) {
        return Ok(None);
    }
    let b0 = b0_sq.sqrt();
    let mut betas = vec![b0; dim];
    for (a, beta) in betas.iter_mut().enumerate().skip(1) {
        // products[a] holds β_0 β_a
        *beta = products[a] / b0;
    }
    Ok(Some(betas))
}

/// Gauss–Newton on `|Σ β_a Δv_a|² = d²` over all pairs.
fn refine_betas(
    mut betas: Vec<f64>,
    kernel: &[DVector<f64>],
    pairs: &[(usize, usize, f64)],
    iterations: usize,
) -> Result<Vec<f64>, PnpError> {
    let dim = kernel.len();
    for _ in 0..iterations {
        let mut jac = DMatrix::<f64>::zeros(pairs.len(), dim);
        let mut res = DVector::<f64>::zeros(pairs.len());
        for (row, &(i, j, d2)) in pairs.iter().enumerate() {
            let deltas: Vec<Vector3<f64>> =
                kernel.iter().map(|v| control_delta(v, i, j)).collect();
            let x: Vector3<f64> = deltas.iter().zip(&betas).map(|(d, b)| d * *b).sum();
            res[row] = -(x.norm_squared() - d2);
            for (a, d) in deltas.iter().enumerate() {
                jac[(row, a)] = 2.0 * x.dot(d);
            }
        }
        if !(jac.iter().all(|v| v.is_finite()) && res.iter().all(|v| v.is_finite())) {
            break;
        }
        let svd = jac
            .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERS)
            .ok_or(PnpError::NonConvergent("beta refinement SVD"))?;
        let Ok(step) = svd.solve(&res, SOLVE_EPS) else {
            break;
        };
        for (b, s) in betas.iter_mut().zip(step.iter()) {
            *b += s;
        }
        if step.norm() < 1e-14 {
            break;
        }
    }
    Ok(betas)
}

fn pose_from_betas(
    betas: &[f64],
    kernel: &[DVector<f64>],
    alphas: &[Vec<f64>],
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Result<Option<PnpSolution>, PnpError> {
    let mut x = DVector::<f64>::zeros(kernel[0].len());
    for (v, b) in kernel.iter().zip(betas) {
        x += v * *b;
    }
    let controls: Vec<Vector3<f64>> = (0..x.len() / 3)
        .map(|j| Vector3::new(x[3 * j], x[3 * j + 1], x[3 * j + 2]))
        .collect();

    let mut camera: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|alpha| {
            alpha
                .iter()
                .zip(&controls)
                .map(|(a, c)| c * *a)
                .sum::<Vector3<f64>>()
        })
        .collect();
    if camera.iter().map(|p| p.z).sum::<f64>() < 0.0 {
        camera.iter_mut().for_each(|p| *p = -*p);
    }

    let Some((rotation, translation)) = absolute_orientation(object, &camera)? else {
        return Ok(None);
    };

    let mut sq = 0.0;
    for (p, uv) in object.iter().zip(image) {
        let pc = rotation * p.coords + translation;
        if pc.z <= 0.0 {
            return Ok(None);
        }
        let du = pc.x / pc.z - uv.x;
        let dv = pc.y / pc.z - uv.y;
        sq += du * du + dv * dv;
    }
    let reprojection_rmse = (sq / object.len() as f64).sqrt();
    if !reprojection_rmse.is_finite() {
        return Ok(None);
    }

    let rvec = Rotation3::from_matrix_unchecked(rotation).scaled_axis();
    Ok(Some(PnpSolution {
        rotation,
        rvec,
        translation,
        reprojection_rmse,
    }))
}

/// Rigid transform `R, t` minimizing `Σ |R w + t - c|²` (Kabsch).
///
/// `None` when the camera-frame points are not finite.
fn absolute_orientation(
    world: &[Point3<f64>],
    camera: &[Vector3<f64>],
) -> Result<Option<(Matrix3<f64>, Vector3<f64>)>, PnpError> {
    let n = world.len() as f64;
    let cw = world.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    let cc = camera.iter().sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::<f64>::zeros();
    for (w, c) in world.iter().zip(camera) {
        h += (w.coords - cw) * (c - cc).transpose();
    }

    if !h.iter().all(|x| x.is_finite()) {
        return Ok(None);
    }

    let svd = h
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERS)
        .ok_or(PnpError::NonConvergent("absolute orientation SVD"))?;
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Ok(None);
    };
    let v = v_t.transpose();
    let mut rotation = v * u.transpose();
    if rotation.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let mut d = Matrix3::<f64>::identity();
        d[(weakest, weakest)] = -1.0;
        rotation = v * d * u.transpose();
    }
    if !rotation.iter().all(|x| x.is_finite()) {
        return Ok(None);
    }
    let translation = cc - rotation * cw;
    Ok(Some((rotation, translation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project_all(
        object: &[Point3<f64>],
        rotation: &Rotation3<f64>,
        t: &Vector3<f64>,
    ) -> Vec<Point2<f64>> {
        object
            .iter()
            .map(|p| {
                let c = rotation * p.coords + t;
                Point2::new(c.x / c.z, c.y / c.z)
            })
            .collect()
    }

    fn cube_corners() -> Vec<Point3<f64>> {
        let mut out = Vec::new();
        for &x in &[-0.5, 0.5] {
            for &y in &[-0.5, 0.5] {
                for &z in &[-0.5, 0.5] {
                    out.push(Point3::new(x, y, z));
                }
            }
        }
        out
    }

    #[test]
    fn recovers_pose_of_non_planar_points() {
        let object = cube_corners();
        let rotation = Rotation3::from_scaled_axis(Vector3::new(0.2, -0.1, 0.3));
        let t = Vector3::new(0.1, -0.2, 4.0);
        let image = project_all(&object, &rotation, &t);

        let sol = solve_epnp(&object, &image, &EpnpParams::default()).expect("solve");
        assert_relative_eq!(sol.translation, t, epsilon = 1e-6);
        assert_relative_eq!(sol.rvec, rotation.scaled_axis(), epsilon = 1e-6);
        assert!(sol.reprojection_rmse < 1e-8);
    }

    #[test]
    fn recovers_pose_of_planar_points() {
        let object: Vec<_> = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0], [0.3, 0.2]]
            .iter()
            .map(|&[x, y]| Point3::new(x, y, 0.0))
            .collect();
        let rotation = Rotation3::from_scaled_axis(Vector3::new(0.1, 0.15, -0.05));
        let t = Vector3::new(-0.3, 0.2, 6.0);
        let image = project_all(&object, &rotation, &t);

        let sol = solve_epnp(&object, &image, &EpnpParams::default()).expect("solve");
        assert_relative_eq!(sol.translation, t, epsilon = 1e-6);
        assert_relative_eq!(sol.rotation, *rotation.matrix(), epsilon = 1e-6);
    }

    #[test]
    fn rejects_bad_input() {
        let object = cube_corners();
        let image = vec![Point2::new(0.0, 0.0); 7];
        assert_eq!(
            solve_epnp(&object, &image, &EpnpParams::default()),
            Err(PnpError::MismatchedLengths {
                object: 8,
                image: 7
            })
        );

        assert_eq!(
            solve_epnp(&object[..3], &image[..3], &EpnpParams::default()),
            Err(PnpError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        );

        let mut image = vec![Point2::new(0.1, 0.1); 8];
        image[5].y = f64::NAN;
        assert_eq!(
            solve_epnp(&object, &image, &EpnpParams::default()),
            Err(PnpError::NonFinite { index: 5 })
        );
    }

    #[test]
    fn collinear_and_coincident_points_are_degenerate() {
        let line: Vec<_> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let image: Vec<_> = (0..5).map(|i| Point2::new(i as f64 * 0.1, 0.0)).collect();
        assert!(matches!(
            solve_epnp(&line, &image, &EpnpParams::default()),
            Err(PnpError::Degenerate(_))
        ));

        let same = vec![Point3::new(1.0, 2.0, 3.0); 4];
        assert!(matches!(
            solve_epnp(&same, &image[..4], &EpnpParams::default()),
            Err(PnpError::Degenerate(_))
        ));
    }

    #[test]
    fn repeated_object_points_do_not_count_twice() {
        // two classes sharing one location leave three distinct points
        let object = [
            Point3::new(0.13, 0.14, 0.14),
            Point3::new(-0.14, -0.15, -0.16),
            Point3::new(-0.14, -0.15, -0.16),
            Point3::new(-0.15, 0.14, 0.14),
        ];
        let rotation = Rotation3::from_scaled_axis(Vector3::new(0.1, 0.2, 0.0));
        let image = project_all(&object, &rotation, &Vector3::new(0.0, 0.0, 1.5));
        assert_eq!(
            solve_epnp(&object, &image, &EpnpParams::default()),
            Err(PnpError::Degenerate("fewer than four distinct object points"))
        );
    }

    #[test]
    fn huge_image_coordinates_fail_instead_of_spinning() {
        let object = cube_corners();
        let image_at = |scale: f64| -> Vec<Point2<f64>> {
            (0..8)
                .map(|i| Point2::new(scale * (i + 1) as f64, -scale * i as f64))
                .collect()
        };
        // finite system: any outcome, as long as it returns
        let _ = solve_epnp(&object, &image_at(1e150), &EpnpParams::default());
        for scale in [1e200, 1e300] {
            assert!(matches!(
                solve_epnp(&object, &image_at(scale), &EpnpParams::default()),
                Err(PnpError::Degenerate(_))
            ));
        }
    }

    #[test]
    fn alphas_reconstruct_the_point() {
        let object = cube_corners();
        let frame = ControlFrame::fit(&object, 1e-6).expect("frame");
        assert_eq!(frame.num_controls(), 4);
        for p in &object {
            let alpha = frame.alphas(p);
            assert_relative_eq!(alpha.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            let back: Vector3<f64> = alpha
                .iter()
                .enumerate()
                .map(|(j, a)| frame.control(j) * *a)
                .sum();
            assert_relative_eq!(back, p.coords, epsilon = 1e-12);
        }
    }
}
