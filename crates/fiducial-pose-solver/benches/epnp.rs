use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fiducial_pose_core::{CameraIntrinsics, TargetModel};
use fiducial_pose_solver::{
    solve_pnp, BoundingBox, EpnpParams, RawDetection, SolverParams, TargetPoseEstimator,
};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

fn reference_scene() -> (Vec<Point3<f64>>, Vec<Point2<f64>>, CameraIntrinsics) {
    let model = TargetModel::reference();
    let camera = CameraIntrinsics::reference();
    let r = Rotation3::from_scaled_axis(Vector3::new(0.1, -0.2, 0.05));
    let t = Vector3::new(0.05, -0.03, 1.5);
    let object: Vec<_> = model.points().iter().map(|p| p.position).collect();
    let pixels = object
        .iter()
        .filter_map(|p| camera.project(&Point3::from(r * p.coords + t)))
        .collect();
    (object, pixels, camera)
}

fn bench_epnp(c: &mut Criterion) {
    let (object, pixels, camera) = reference_scene();
    let params = EpnpParams::default();
    c.bench_function("solve_pnp_reference_8pt", |b| {
        b.iter(|| solve_pnp(black_box(&object), black_box(&pixels), &camera, &params))
    });
}

fn bench_estimate(c: &mut Criterion) {
    let (_, pixels, camera) = reference_scene();
    let raw: Vec<_> = pixels
        .iter()
        .enumerate()
        .map(|(class, p)| {
            RawDetection::new(
                class as i64,
                0.9,
                BoundingBox {
                    center_x: p.x as f32,
                    center_y: p.y as f32,
                    width: 10.0,
                    height: 10.0,
                },
            )
        })
        .collect();
    let Ok(estimator) =
        TargetPoseEstimator::new(TargetModel::reference(), camera, &SolverParams::default())
    else {
        return;
    };
    c.bench_function("estimate_reference_frame", |b| {
        b.iter(|| estimator.estimate(0, black_box(&raw)))
    });
}

criterion_group!(benches, bench_epnp, bench_estimate);
criterion_main!(benches);
