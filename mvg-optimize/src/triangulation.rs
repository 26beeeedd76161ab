use crate::{
    minimize_nelder_mead, relative_simplex_steps, LineDistances, Minimum, NelderMeadSettings,
    PointReprojection,
};
use log::*;
use mvg_core::nalgebra::{DVector, Matrix2, Matrix2x3, Matrix3, Point3, Vector2};
use mvg_core::{
    CameraModel, Observation, ObservedPoint, PixelPoint, Projective, ScenePoint, Undistortion,
    WorldPoint,
};
use mvg_geom::{
    check_views, focal_plane_points, Horaud, Triangulation, TriangulationError, Triangulator,
    TwoLines,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How the observation covariances weight reprojection residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum ReprojectionWeighting {
    /// Plain squared pixel distances.
    Isotropic,
    /// Mahalanobis distances `dᵀ Σ⁻¹ d`. Observations without covariance count as isotropic.
    Uncertainty,
}

impl Default for ReprojectionWeighting {
    fn default() -> Self {
        Self::Isotropic
    }
}

/// Turns the outcome of an iterative point minimization into a triangulation.
fn iterative(minimum: Minimum, views: usize) -> Triangulation {
    let n = views as f64;
    let point = Point3::new(minimum.params[0], minimum.params[1], minimum.params[2]);
    let log = vec![minimum.cost / n, minimum.start_cost / n];
    debug!(
        "iterative triangulation moved the point to {:?}, mean cost {} -> {}",
        point, log[1], log[0]
    );
    Triangulation {
        point,
        residual: log[0],
        log,
    }
}

fn point_params(point: Point3<f64>) -> DVector<f64> {
    DVector::from_column_slice(point.coords.as_slice())
}

fn optimizer_error(e: impl std::fmt::Display) -> TriangulationError {
    warn!("point optimization failed: {}", e);
    TriangulationError::Optimizer(e.to_string())
}

/// Finds the point closest to every back-projected ray.
///
/// It starts from [`TwoLines`] (approximate undistortion) on the first two views and minimizes
/// the sum of squared distances to all rays. Views whose ray cannot be built are left out of the
/// sum. The log is `[end / n, start / n]` for `n` observations.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MultiLines {
    pub undistortion: Undistortion,
    pub nelder_mead: NelderMeadSettings,
}

impl MultiLines {
    /// Rays built with approximate undistortion.
    pub fn new() -> Self {
        Default::default()
    }

    /// Rays built with exact undistortion.
    pub fn perfect() -> Self {
        Self::new().undistortion(Undistortion::Exact)
    }

    #[must_use]
    pub fn undistortion(self, undistortion: Undistortion) -> Self {
        Self {
            undistortion,
            ..self
        }
    }

    #[must_use]
    pub fn nelder_mead(self, nelder_mead: NelderMeadSettings) -> Self {
        Self {
            nelder_mead,
            ..self
        }
    }
}

impl Default for MultiLines {
    fn default() -> Self {
        Self {
            undistortion: Undistortion::Approximate,
            nelder_mead: NelderMeadSettings::default(),
        }
    }
}

impl<P: ObservedPoint> Triangulator<P> for MultiLines {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<P>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError> {
        check_views(observations, cameras)?;
        let initial = TwoLines::new().triangulate(&observations[..2], &cameras[..2])?;
        let lines = focal_plane_points(observations, cameras, self.undistortion)?
            .into_iter()
            .zip(cameras)
            .filter_map(|(focal, camera)| camera.projective_line(focal))
            .collect();
        let start = point_params(initial.point);
        let steps = relative_simplex_steps(start.as_slice());
        let minimum = minimize_nelder_mead(
            LineDistances::new(lines),
            start,
            &steps,
            &self.nelder_mead,
        )
        .map_err(optimizer_error)?;
        Ok(iterative(minimum, observations.len()))
    }
}

/// Finds the point whose projections are closest to the observed pixels.
///
/// It starts from [`TwoLines`] (approximate undistortion) on the first two views and minimizes
/// the sum of squared reprojection errors through the full distortion model of each camera. The
/// log is `[end / n, start / n]` for `n` observations.
///
/// Only pixel observations can be reprojected through the distortion model, so this method does
/// not accept focal plane points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ReprojectionOptimization {
    pub weighting: ReprojectionWeighting,
    pub nelder_mead: NelderMeadSettings,
}

impl ReprojectionOptimization {
    pub fn new() -> Self {
        Default::default()
    }

    /// Residuals weighted by the observation covariances.
    pub fn uncertainty() -> Self {
        Self::new().weighting(ReprojectionWeighting::Uncertainty)
    }

    #[must_use]
    pub fn weighting(self, weighting: ReprojectionWeighting) -> Self {
        Self { weighting, ..self }
    }

    #[must_use]
    pub fn nelder_mead(self, nelder_mead: NelderMeadSettings) -> Self {
        Self {
            nelder_mead,
            ..self
        }
    }
}

impl Default for ReprojectionOptimization {
    fn default() -> Self {
        Self {
            weighting: ReprojectionWeighting::Isotropic,
            nelder_mead: NelderMeadSettings::default(),
        }
    }
}

impl Triangulator<PixelPoint> for ReprojectionOptimization {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<PixelPoint>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError> {
        check_views(observations, cameras)?;
        let initial = TwoLines::new().triangulate(&observations[..2], &cameras[..2])?;
        let function = PointReprojection::new(
            cameras,
            observations,
            self.weighting == ReprojectionWeighting::Uncertainty,
        );
        let start = point_params(initial.point);
        let steps = relative_simplex_steps(start.as_slice());
        let minimum = minimize_nelder_mead(function, start, &steps, &self.nelder_mead)
            .map_err(optimizer_error)?;
        Ok(iterative(minimum, observations.len()))
    }
}

/// Every triangulation method, selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Reconst3dMethod {
    HoraudApprox,
    HoraudPerfect,
    TwoLinesApprox,
    TwoLinesPerfect,
    MultiLinesApprox,
    MultiLinesPerfect,
    ReprojectionOptimization,
    ReprojectionOptimizationUncertainty,
}

impl Reconst3dMethod {
    pub const ALL: [Reconst3dMethod; 8] = [
        Self::HoraudApprox,
        Self::HoraudPerfect,
        Self::TwoLinesApprox,
        Self::TwoLinesPerfect,
        Self::MultiLinesApprox,
        Self::MultiLinesPerfect,
        Self::ReprojectionOptimization,
        Self::ReprojectionOptimizationUncertainty,
    ];

    /// Whether the method refines its estimate iteratively.
    pub fn is_iterative(self) -> bool {
        matches!(
            self,
            Self::MultiLinesApprox
                | Self::MultiLinesPerfect
                | Self::ReprojectionOptimization
                | Self::ReprojectionOptimizationUncertainty
        )
    }
}

impl Triangulator<PixelPoint> for Reconst3dMethod {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<PixelPoint>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError> {
        match self {
            Self::HoraudApprox => Horaud::new().triangulate(observations, cameras),
            Self::HoraudPerfect => Horaud::perfect().triangulate(observations, cameras),
            Self::TwoLinesApprox => TwoLines::new().triangulate(observations, cameras),
            Self::TwoLinesPerfect => TwoLines::perfect().triangulate(observations, cameras),
            Self::MultiLinesApprox => MultiLines::new().triangulate(observations, cameras),
            Self::MultiLinesPerfect => MultiLines::perfect().triangulate(observations, cameras),
            Self::ReprojectionOptimization => {
                ReprojectionOptimization::new().triangulate(observations, cameras)
            }
            Self::ReprojectionOptimizationUncertainty => {
                ReprojectionOptimization::uncertainty().triangulate(observations, cameras)
            }
        }
    }
}

/// Post-processing applied by [`reconst3d`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Reconst3dOptions {
    /// Reconstructions whose residual exceeds this are rejected.
    pub error_max: Option<f64>,
    /// Attach the first-order covariance of the point, see [`propagate_covariance`].
    pub propagate_covariance: bool,
    /// The weighting used by the propagation.
    pub covariance_weighting: ReprojectionWeighting,
}

impl Reconst3dOptions {
    #[must_use]
    pub fn error_max(self, error_max: f64) -> Self {
        Self {
            error_max: Some(error_max),
            ..self
        }
    }

    #[must_use]
    pub fn propagate_covariance(self, weighting: ReprojectionWeighting) -> Self {
        Self {
            propagate_covariance: true,
            covariance_weighting: weighting,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// Visible, with the first log entry as its error.
    pub point: ScenePoint,
    /// Acquisition plane of the first camera.
    pub plane: usize,
    pub log: Vec<f64>,
}

impl Reconstruction {
    /// The reconstructed point, or a point at the origin carrying
    /// [`ScenePoint::REJECTED_ERROR`] when the reconstruction failed.
    pub fn point_or_rejected(result: &Result<Reconstruction, TriangulationError>) -> ScenePoint {
        match result {
            Ok(reconstruction) => reconstruction.point,
            Err(_) => ScenePoint::rejected(Point3::origin()),
        }
    }
}

/// Reconstructs a world point from one observation per camera.
///
/// ```
/// use mvg_core::{nalgebra::{Point2, Point3, Rotation3, Vector3}, Observation, PixelPoint, Pose, WorldToCamera};
/// use mvg_optimize::{reconst3d, Reconst3dMethod, Reconst3dOptions};
/// use mvg_pinhole::{CameraIntrinsics, PinholeCamera};
///
/// let intrinsics = CameraIntrinsics::identity()
///     .focal(1000.0)
///     .principal_point(Point2::new(320.0, 240.0));
/// let cameras = [
///     PinholeCamera::new(intrinsics),
///     PinholeCamera::new(intrinsics).with_extrinsic(WorldToCamera::from_parts(
///         Vector3::new(-100.0, 0.0, 0.0),
///         Rotation3::identity(),
///     )),
/// ];
/// let observations = [
///     Observation::new(PixelPoint::new(340.0, 280.0)),
///     Observation::new(PixelPoint::new(140.0, 280.0)),
/// ];
/// let reconstruction = reconst3d(
///     &observations,
///     &cameras,
///     &Reconst3dMethod::ReprojectionOptimization,
///     &Reconst3dOptions::default(),
/// )
/// .unwrap();
/// assert!((reconstruction.point.position - Point3::new(10.0, 20.0, 500.0)).norm() < 1e-3);
/// ```
pub fn reconst3d<P, C, T>(
    observations: &[Observation<P>],
    cameras: &[C],
    triangulator: &T,
    options: &Reconst3dOptions,
) -> Result<Reconstruction, TriangulationError>
where
    P: ObservedPoint,
    C: CameraModel + Clone,
    T: Triangulator<P>,
{
    check_views(observations, cameras)?;
    let triangulation = triangulator
        .triangulate(observations, cameras)
        .map_err(|e| {
            if let TriangulationError::Degenerate(kind) = e {
                warn!("degenerate triangulation: {:?}", kind);
            }
            e
        })?;
    if let Some(maximum) = options.error_max {
        if triangulation.residual > maximum {
            debug!(
                "rejecting reconstruction with residual {} above {}",
                triangulation.residual, maximum
            );
            return Err(TriangulationError::ErrorAboveThreshold {
                residual: triangulation.residual,
                maximum,
            });
        }
    }
    let mut point = ScenePoint::new(triangulation.point).error(triangulation.residual);
    if options.propagate_covariance {
        point.covariance = propagate_covariance(
            triangulation.point,
            observations,
            cameras,
            options.covariance_weighting,
        );
    }
    Ok(Reconstruction {
        point,
        plane: cameras[0].plane(),
        log: triangulation.log,
    })
}

/// Numerical Jacobian of the reprojection of `point` by `camera`.
fn reprojection_jacobian<P, C>(camera: &C, point: Point3<f64>) -> Option<Matrix2x3<f64>>
where
    P: ObservedPoint,
    C: CameraModel,
{
    let mut columns = [Vector2::zeros(); 3];
    for (ix, column) in columns.iter_mut().enumerate() {
        let h = f64::EPSILON.cbrt() * point[ix].abs().max(1.0);
        let mut plus = point;
        plus[ix] += h;
        let mut minus = point;
        minus[ix] -= h;
        let plus = P::reproject(camera, WorldPoint::from_point(plus))?;
        let minus = P::reproject(camera, WorldPoint::from_point(minus))?;
        *column = (plus - minus) / (2.0 * h);
    }
    Some(Matrix2x3::from_columns(&columns))
}

/// First-order propagation of the observation covariances to a reconstructed point.
///
/// With `J` the Jacobian of each reprojection and `W` its weight (`Σ⁻¹`, or `I / Σ₀₀` when
/// isotropic), the covariance is `H⁻¹ Γ H⁻ᵀ` where `H = Σ Jᵀ W J` and `Γ = Σ Jᵀ W Σ W J`.
///
/// More than one perfect observation (zero or missing covariance) pins the point exactly and
/// yields the zero matrix. A single perfect observation is left out. Returns `None` when `H` is
/// singular or the point does not reproject.
pub fn propagate_covariance<P, C>(
    point: Point3<f64>,
    observations: &[Observation<P>],
    cameras: &[C],
    weighting: ReprojectionWeighting,
) -> Option<Matrix3<f64>>
where
    P: ObservedPoint,
    C: CameraModel,
{
    let perfect = observations
        .iter()
        .filter(|o| o.informative_covariance().is_none())
        .count();
    if perfect > 1 {
        return Some(Matrix3::zeros());
    }
    let mut h = Matrix3::zeros();
    let mut gamma = Matrix3::zeros();
    for (observation, camera) in observations.iter().zip(cameras) {
        let sigma = match observation.informative_covariance() {
            Some(sigma) => sigma,
            None => continue,
        };
        let w = match weighting {
            ReprojectionWeighting::Uncertainty => sigma.try_inverse()?,
            ReprojectionWeighting::Isotropic if sigma[(0, 0)] != 0.0 => {
                Matrix2::identity() / sigma[(0, 0)]
            }
            ReprojectionWeighting::Isotropic => return None,
        };
        let j = reprojection_jacobian::<P, C>(camera, point)?;
        h += j.transpose() * w * j;
        gamma += j.transpose() * w * sigma * w * j;
    }
    let h_inv = h.try_inverse()?;
    Some(h_inv * gamma * h_inv.transpose())
}
