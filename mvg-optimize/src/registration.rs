use crate::{
    cost::{check_layout, visible_count}, minimize, pose_simplex_steps, relative_simplex_steps, Backend, Eppc,
    Isppc, Minimum, OptimizerSettings, Osppc, RegistrationError, RegistrationSettings,
    ResidualFunction,
};
use log::*;
use mvg_core::nalgebra::{DVector, Point3, Vector6};
use mvg_core::{CameraModel, Observation, PixelPoint, Pose, RigidTransform, ScenePoint};
use mvg_geom::planar_homography_registration;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Fewest visible observations a pose can be registered from.
pub const MIN_VISIBLE_POINTS: usize = 3;

/// The quantity minimized over the pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Criterion {
    /// Squared pixel reprojection errors.
    Isppc,
    /// Pixel reprojection errors weighted by the observation covariances.
    IsppcAnisotropic,
    /// Squared distances of the transformed model to the back-projected rays.
    Osppc,
    /// Joint refinement of the model points and the pose, weighted by the covariances of both.
    Eppc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RegistrationMethod {
    pub criterion: Criterion,
    pub backend: Backend,
}

impl RegistrationMethod {
    pub fn new(criterion: Criterion, backend: Backend) -> Self {
        Self { criterion, backend }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// The model to world transform, with its final RMS and a zero standard deviation.
    pub transform: RigidTransform,
    /// `[rms_end, rms_start]`, followed for EPPC by the final 2D error, 3D error and pose change.
    pub log: Vec<f64>,
    /// The model points as refined by EPPC.
    pub refined_model: Option<Vec<ScenePoint>>,
}

fn check_inputs<C: CameraModel>(
    cameras: &[C],
    observations: &[Vec<Observation<PixelPoint>>],
    model: &[ScenePoint],
) -> Result<usize, RegistrationError> {
    if cameras.is_empty() {
        return Err(RegistrationError::NoCameras);
    }
    if let Some(ix) = cameras.iter().position(|c| !c.is_intrinsic_calibrated()) {
        return Err(RegistrationError::UncalibratedCamera(ix));
    }
    check_layout(cameras.len(), observations, model.len())?;
    let visible = visible_count(observations);
    if visible < MIN_VISIBLE_POINTS {
        return Err(RegistrationError::NotEnoughVisiblePoints {
            required: MIN_VISIBLE_POINTS,
            actual: visible,
        });
    }
    Ok(visible)
}

fn optimizer_error(e: impl std::fmt::Display) -> RegistrationError {
    warn!("registration optimizer failed: {}", e);
    RegistrationError::Optimizer(e.to_string())
}

fn rms(cost: f64, count: usize) -> f64 {
    (cost / count as f64).sqrt()
}

fn fit_pose<F>(
    function: F,
    start: DVector<f64>,
    backend: Backend,
    settings: &OptimizerSettings,
) -> Result<Minimum, RegistrationError>
where
    F: ResidualFunction + Clone,
{
    let steps = pose_simplex_steps(start.as_slice());
    minimize(function, start, &steps, backend, settings).map_err(optimizer_error)
}

fn transform_of(params: &DVector<f64>) -> RigidTransform {
    RigidTransform::from_se3(Vector6::from_column_slice(params.as_slice()))
}

/// Registers a rigid 3D model to its 2D observations on a calibrated camera rig.
///
/// `observations[i][j]` is the observation of `model[j]` by `cameras[i]`. Hidden observations
/// are skipped. The pose is refined from `initial` by minimizing the criterion of `method` with
/// its backend, and the result is never worse than `initial` for that criterion.
///
/// The RMS values in the log are `sqrt(cost / visible)` with `visible` the number of visible
/// observations.
pub fn multi_view_point_registration_3d2d<C>(
    cameras: &[C],
    observations: &[Vec<Observation<PixelPoint>>],
    model: &[ScenePoint],
    initial: &RigidTransform,
    method: RegistrationMethod,
    settings: &RegistrationSettings,
) -> Result<Registration, RegistrationError>
where
    C: CameraModel + Clone,
{
    let visible = check_inputs(cameras, observations, model)?;
    let positions: Vec<Point3<f64>> = model.iter().map(|p| p.position).collect();
    let start = DVector::from_column_slice(initial.se3().as_slice());
    let backend = method.backend;
    let optimizer = &settings.optimizer;

    let minimum = match method.criterion {
        Criterion::Isppc => fit_pose(
            Isppc::new(cameras, observations, &positions, false)?,
            start,
            backend,
            optimizer,
        )?,
        Criterion::IsppcAnisotropic => fit_pose(
            Isppc::new(cameras, observations, &positions, true)?,
            start,
            backend,
            optimizer,
        )?,
        Criterion::Osppc => fit_pose(
            Osppc::new(cameras, observations, &positions)?,
            start,
            backend,
            optimizer,
        )?,
        Criterion::Eppc => {
            return register_eppc(cameras, observations, model, start, visible, backend, settings)
        }
    };

    let rms_start = rms(minimum.start_cost, visible);
    let rms_end = rms(minimum.cost, visible);
    info!(
        "{:?} registration with {:?} over {} observations: rms {} -> {}",
        method.criterion, backend, visible, rms_start, rms_end
    );
    Ok(Registration {
        transform: transform_of(&minimum.params).with_quality(rms_end, 0.0),
        log: vec![rms_end, rms_start],
        refined_model: None,
    })
}

/// Refines the model points with the pose fixed.
///
/// Least squares works on all points at once. The other backends exploit the separability of
/// the criterion and minimize each point on its own.
fn refine_points<C>(
    cameras: &[C],
    observations: &[Vec<Observation<PixelPoint>>],
    model: &[ScenePoint],
    transform: RigidTransform,
    points: &DVector<f64>,
    backend: Backend,
    settings: &OptimizerSettings,
) -> Result<DVector<f64>, RegistrationError>
where
    C: CameraModel + Clone,
{
    if backend == Backend::LevenbergMarquardt {
        let eppc = Eppc::new(cameras, observations, model, transform)?;
        let minimum = minimize(eppc, points.clone(), &[], backend, settings)
            .map_err(optimizer_error)?;
        return Ok(minimum.params);
    }
    let mut refined = points.clone();
    for j in 0..model.len() {
        let eppc = Eppc::single(cameras, observations, model, transform, j)?;
        let start = points.rows(3 * j, 3).into_owned();
        let steps = relative_simplex_steps(start.as_slice());
        let minimum = minimize(eppc, start, &steps, backend, settings).map_err(optimizer_error)?;
        refined.rows_mut(3 * j, 3).copy_from(&minimum.params);
    }
    Ok(refined)
}

fn register_eppc<C>(
    cameras: &[C],
    observations: &[Vec<Observation<PixelPoint>>],
    model: &[ScenePoint],
    start: DVector<f64>,
    visible: usize,
    backend: Backend,
    settings: &RegistrationSettings,
) -> Result<Registration, RegistrationError>
where
    C: CameraModel + Clone,
{
    let optimizer = &settings.optimizer;
    let eppc_settings = &settings.eppc;
    let point_settings = OptimizerSettings {
        nelder_mead: optimizer
            .nelder_mead
            .restart_tolerance(eppc_settings.point_tolerance),
        levenberg_marquardt: optimizer
            .levenberg_marquardt
            .tolerance(eppc_settings.point_tolerance),
        ..*optimizer
    };

    let measured = Eppc::new(cameras, observations, model, transform_of(&start))?;
    let measured_points = measured.initial_params();
    let start_cost = measured.cost(&measured_points);

    let positions: Vec<Point3<f64>> = model.iter().map(|p| p.position).collect();
    let mut pose = fit_pose(
        Isppc::new(cameras, observations, &positions, true)?,
        start,
        backend,
        optimizer,
    )?
    .params;
    let mut points = measured_points.clone();
    let mut delta = f64::INFINITY;

    for round in 0..eppc_settings.max_iterations {
        points = refine_points(
            cameras,
            observations,
            model,
            transform_of(&pose),
            &points,
            backend,
            &point_settings,
        )?;
        let refined: Vec<Point3<f64>> = (0..model.len())
            .map(|j| Point3::new(points[3 * j], points[3 * j + 1], points[3 * j + 2]))
            .collect();
        let next = fit_pose(
            Isppc::new(cameras, observations, &refined, true)?,
            pose.clone(),
            backend,
            optimizer,
        )?
        .params;
        delta = ((&next - &pose).norm_squared() / next.len() as f64).sqrt();
        pose = next;
        debug!("eppc round {} changed the pose by rms {}", round, delta);
        if delta <= eppc_settings.pose_tolerance {
            break;
        }
    }

    let transform = transform_of(&pose);
    let end = Eppc::new(cameras, observations, model, transform)?;
    let mut end_cost = end.cost(&points);
    let measured_cost = end.cost(&measured_points);
    if end_cost.is_nan() || end_cost > measured_cost {
        points = measured_points;
        end_cost = measured_cost;
    }
    let (cost_2d, cost_3d) = end.split_cost(&points);

    let rms_start = rms(start_cost, visible);
    let rms_end = rms(end_cost, visible);
    let error_2d = rms(cost_2d, visible);
    let error_3d = rms(cost_3d, model.len().max(1));
    info!(
        "Eppc registration with {:?} over {} observations: rms {} -> {}, 2d {} 3d {}",
        backend, visible, rms_start, rms_end, error_2d, error_3d
    );

    let refined_model = model
        .iter()
        .enumerate()
        .map(|(j, p)| ScenePoint {
            position: Point3::new(points[3 * j], points[3 * j + 1], points[3 * j + 2]),
            ..*p
        })
        .collect();
    Ok(Registration {
        transform: transform.with_quality(rms_end, 0.0),
        log: vec![rms_end, rms_start, error_2d, error_3d, delta],
        refined_model: Some(refined_model),
    })
}

/// Registers a planar model seen by a single camera.
///
/// The pose is initialized by the homography between the visible model points (taken on their
/// `z = 0` plane) and their observations, then refined with `method` if one is given. Without
/// refinement the log is `[mean_reprojection_error, second_column_norm]` of the homography.
pub fn mono_view_point_registration_3d2d<C>(
    camera: &C,
    observations: &[Observation<PixelPoint>],
    model: &[ScenePoint],
    method: Option<RegistrationMethod>,
    settings: &RegistrationSettings,
) -> Result<Registration, RegistrationError>
where
    C: CameraModel + Clone,
{
    if !camera.is_intrinsic_calibrated() {
        return Err(RegistrationError::UncalibratedCamera(0));
    }
    if observations.len() != model.len() {
        return Err(RegistrationError::ShapeMismatch {
            camera: 0,
            expected: model.len(),
            actual: observations.len(),
        });
    }
    let (image, planar): (Vec<PixelPoint>, Vec<ScenePoint>) = observations
        .iter()
        .zip(model)
        .filter(|(o, _)| o.visible)
        .map(|(o, m)| (o.point, *m))
        .unzip();
    let homography = planar_homography_registration(camera, &image, &planar, true)?;
    debug!(
        "homography initialization with mean reprojection error {}",
        homography.mean_reprojection_error
    );
    match method {
        Some(method) => multi_view_point_registration_3d2d(
            std::slice::from_ref(camera),
            &[observations.to_vec()],
            model,
            &homography.transform,
            method,
            settings,
        ),
        None => Ok(Registration {
            transform: homography
                .transform
                .with_quality(homography.mean_reprojection_error, 0.0),
            log: vec![
                homography.mean_reprojection_error,
                homography.second_column_norm,
            ],
            refined_model: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvg_core::nalgebra::Point2;
    use mvg_pinhole::{CameraIntrinsics, PinholeCamera};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::identity()
                .focal(800.0)
                .principal_point(Point2::new(320.0, 240.0)),
        )
    }

    fn model() -> Vec<ScenePoint> {
        (0..4)
            .map(|i| ScenePoint::new(Point3::new(i as f64, 0.0, 100.0)))
            .collect()
    }

    fn register(
        cameras: &[PinholeCamera],
        observations: &[Vec<Observation<PixelPoint>>],
    ) -> Result<Registration, RegistrationError> {
        multi_view_point_registration_3d2d(
            cameras,
            observations,
            &model(),
            &RigidTransform::identity(),
            RegistrationMethod::new(Criterion::Isppc, Backend::LevenbergMarquardt),
            &RegistrationSettings::default(),
        )
    }

    fn seen() -> Vec<Observation<PixelPoint>> {
        vec![Observation::new(PixelPoint::new(320.0, 240.0)); 4]
    }

    #[test]
    fn preconditions_in_order() {
        assert_eq!(register(&[], &[]), Err(RegistrationError::NoCameras));
        assert_eq!(
            register(&[camera(), camera().calibrated(false)], &[]),
            Err(RegistrationError::UncalibratedCamera(1))
        );
        assert_eq!(
            register(&[camera()], &[seen(), seen()]),
            Err(RegistrationError::CameraCountMismatch {
                observations: 2,
                cameras: 1
            })
        );
        assert_eq!(
            register(&[camera(), camera()], &[seen(), seen()[..3].to_vec()]),
            Err(RegistrationError::ShapeMismatch {
                camera: 1,
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn hidden_observations_do_not_count() {
        let mut observations = seen();
        observations[0] = Observation::hidden(PixelPoint::new(0.0, 0.0));
        observations[3].visible = false;
        assert_eq!(
            register(&[camera()], &[observations]),
            Err(RegistrationError::NotEnoughVisiblePoints {
                required: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn mono_view_checks_the_camera() {
        let result = mono_view_point_registration_3d2d(
            &camera().calibrated(false),
            &seen(),
            &model(),
            None,
            &RegistrationSettings::default(),
        );
        assert_eq!(result, Err(RegistrationError::UncalibratedCamera(0)));
    }

    #[test]
    fn mono_view_needs_four_visible_points() {
        let mut observations = seen();
        observations[2].visible = false;
        let result = mono_view_point_registration_3d2d(
            &camera(),
            &observations,
            &model(),
            None,
            &RegistrationSettings::default(),
        );
        assert!(matches!(result, Err(RegistrationError::Homography(_))));
    }
}
