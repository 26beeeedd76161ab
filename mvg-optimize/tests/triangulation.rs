use mvg_core::nalgebra::{Matrix2, Point2, Point3, Rotation3, Vector2, Vector3};
use mvg_core::{
    CameraModel, Observation, PixelPoint, Pose, Projective, WorldPoint, WorldToCamera,
};
use mvg_geom::Triangulator;
use mvg_optimize::{
    reconst3d, Reconst3dMethod, Reconst3dOptions, ReprojectionOptimization,
    ReprojectionWeighting,
};
use mvg_pinhole::{BrownDistortion, CameraIntrinsics, PinholeCamera};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn rig() -> Vec<PinholeCamera> {
    let intrinsics = CameraIntrinsics::identity()
        .focals(Vector2::new(1100.0, 1100.0))
        .principal_point(Point2::new(640.0, 480.0));
    let distortion = BrownDistortion::from_coefficients([-0.1, 0.02, 0.0003, -0.0002, 0.0]);
    let poses = [
        (Vector3::zeros(), Vector3::zeros()),
        (Vector3::new(-120.0, 0.0, 10.0), Vector3::new(0.0, 0.15, 0.0)),
        (Vector3::new(0.0, -90.0, 5.0), Vector3::new(-0.1, 0.0, 0.02)),
        (Vector3::new(110.0, 60.0, 0.0), Vector3::new(0.08, -0.12, 0.0)),
    ];
    poses
        .iter()
        .map(|&(t, r)| {
            PinholeCamera::new(intrinsics)
                .distortion(distortion)
                .with_extrinsic(WorldToCamera::from_parts(t, Rotation3::from_scaled_axis(r)))
        })
        .collect()
}

fn observe(cameras: &[PinholeCamera], point: Point3<f64>) -> Vec<Observation<PixelPoint>> {
    cameras
        .iter()
        .map(|c| Observation::new(c.project(WorldPoint::from_point(point)).unwrap()))
        .collect()
}

#[test]
fn reprojected_reconstruction_is_a_fixed_point() {
    let cameras = rig();
    let mut rng = SmallRng::seed_from_u64(21);
    for method in [
        Reconst3dMethod::TwoLinesPerfect,
        Reconst3dMethod::MultiLinesPerfect,
        Reconst3dMethod::ReprojectionOptimization,
    ] {
        for _ in 0..5 {
            let point = Point3::new(
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
                rng.gen_range(400.0..800.0),
            );
            let mut observations = observe(&cameras, point);
            for o in &mut observations {
                o.point.0 += Vector2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            }
            let views = if method.is_iterative() { cameras.len() } else { 2 };
            let first = reconst3d(
                &observations[..views],
                &cameras[..views],
                &method,
                &Reconst3dOptions::default(),
            )
            .unwrap()
            .point
            .position;
            let again = reconst3d(
                &observe(&cameras[..views], first),
                &cameras[..views],
                &method,
                &Reconst3dOptions::default(),
            )
            .unwrap()
            .point
            .position;
            assert!((first - again).norm() < 1e-3, "{:?}", method);
        }
    }
}

#[test]
fn repeated_calls_give_identical_results() {
    let cameras = rig();
    let mut rng = SmallRng::seed_from_u64(34);
    let point = Point3::new(-25.0, 18.0, 620.0);
    let observations: Vec<_> = observe(&cameras, point)
        .into_iter()
        .map(|mut o| {
            o.point.0 += Vector2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            o.covariance(Matrix2::identity() * 0.5)
        })
        .collect();
    let options = Reconst3dOptions::default().propagate_covariance(ReprojectionWeighting::Uncertainty);
    for method in Reconst3dMethod::ALL {
        let views = if method.is_iterative() { cameras.len() } else { 2 };
        let run = || {
            reconst3d(&observations[..views], &cameras[..views], &method, &options).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.point.position, second.point.position, "{:?}", method);
        assert_eq!(first.point.covariance, second.point.covariance, "{:?}", method);
        assert_eq!(first.log, second.log, "{:?}", method);
    }
}

#[test]
fn reprojection_beats_two_views_under_noise() {
    let cameras = rig();
    let mut rng = SmallRng::seed_from_u64(8);
    let mut two_lines = 0.0;
    let mut reprojection = 0.0;
    for _ in 0..20 {
        let point = Point3::new(
            rng.gen_range(-40.0..40.0),
            rng.gen_range(-40.0..40.0),
            rng.gen_range(400.0..800.0),
        );
        let mut observations = observe(&cameras, point);
        for o in &mut observations {
            o.point.0 += Vector2::new(rng.gen_range(-0.7..0.7), rng.gen_range(-0.7..0.7));
        }
        let options = Reconst3dOptions::default();
        let closed = reconst3d(
            &observations[..2],
            &cameras[..2],
            &Reconst3dMethod::TwoLinesPerfect,
            &options,
        )
        .unwrap();
        let iterative = reconst3d(
            &observations,
            &cameras,
            &Reconst3dMethod::ReprojectionOptimization,
            &options,
        )
        .unwrap();
        two_lines += (closed.point.position - point).norm();
        reprojection += (iterative.point.position - point).norm();
    }
    assert!(reprojection < two_lines);
}

#[test]
fn uncertainty_weighting_trusts_precise_views() {
    let cameras = rig();
    let point = Point3::new(12.0, -7.0, 550.0);
    let mut observations = observe(&cameras, point);
    // The last view is both noisy and declared imprecise.
    observations[3].point.0 += Vector2::new(6.0, -6.0);
    let observations: Vec<_> = observations
        .into_iter()
        .enumerate()
        .map(|(ix, o)| {
            let variance = if ix == 3 { 100.0 } else { 0.01 };
            o.covariance(Matrix2::identity() * variance)
        })
        .collect();
    let isotropic = ReprojectionOptimization::new()
        .triangulate(&observations, &cameras)
        .unwrap();
    let weighted = ReprojectionOptimization::new()
        .weighting(ReprojectionWeighting::Uncertainty)
        .triangulate(&observations, &cameras)
        .unwrap();
    assert!((weighted.point - point).norm() < (isotropic.point - point).norm());
}

#[test]
fn propagated_covariance_matches_scatter() {
    let cameras = rig();
    let point = Point3::new(0.0, 10.0, 600.0);
    let sigma = 0.5;
    let options = Reconst3dOptions::default().propagate_covariance(ReprojectionWeighting::Uncertainty);
    let predicted = reconst3d(
        &observe(&cameras, point)
            .into_iter()
            .map(|o| o.covariance(Matrix2::identity() * sigma * sigma))
            .collect::<Vec<_>>(),
        &cameras,
        &Reconst3dMethod::ReprojectionOptimization,
        &options,
    )
    .unwrap()
    .point
    .covariance
    .unwrap();

    let mut rng = SmallRng::seed_from_u64(99);
    let samples = 200;
    let mut depth_variance = 0.0;
    for _ in 0..samples {
        let mut observations = observe(&cameras, point);
        for o in &mut observations {
            // Uniform noise with the requested standard deviation.
            let half = sigma * 3f64.sqrt();
            o.point.0 += Vector2::new(rng.gen_range(-half..half), rng.gen_range(-half..half));
        }
        let estimate = reconst3d(
            &observations,
            &cameras,
            &Reconst3dMethod::ReprojectionOptimization,
            &Reconst3dOptions::default(),
        )
        .unwrap()
        .point
        .position;
        depth_variance += (estimate.z - point.z).powi(2);
    }
    depth_variance /= samples as f64;
    let ratio = depth_variance / predicted[(2, 2)];
    assert!(ratio > 0.5 && ratio < 2.0, "ratio {}", ratio);
}

#[test]
fn strongly_distorted_edge_point() {
    let cameras = rig();
    let point = Point3::new(300.0, 200.0, 700.0);
    let observations = observe(&cameras, point);
    assert!(cameras
        .iter()
        .all(|c| c.extrinsic().transform(WorldPoint::from_point(point)).point().unwrap().z > 0.0));
    let reconstruction = reconst3d(
        &observations,
        &cameras,
        &Reconst3dMethod::MultiLinesApprox,
        &Reconst3dOptions::default(),
    )
    .unwrap();
    assert!((reconstruction.point.position - point).norm() < 0.5);
}
