use crate::{DegeneracyKind, TriangulationError};
use log::*;
use mvg_core::nalgebra::{IsometryMatrix3, Point3, Vector3};
use mvg_core::{CameraModel, FocalPlanePoint, Observation, ObservedPoint, Pose, Undistortion};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The outcome of a triangulation, in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangulation {
    pub point: Point3<f64>,
    /// The quality measure of the method, also the first entry of `log`.
    pub residual: f64,
    /// Closed-form methods log `[residual]`, iterative ones `[end / n, start / n]`.
    pub log: Vec<f64>,
}

impl Triangulation {
    pub fn closed_form(point: Point3<f64>, residual: f64) -> Self {
        Self {
            point,
            residual,
            log: vec![residual],
        }
    }
}

/// A strategy that reconstructs one world point from its observations on several cameras.
///
/// Observation `i` must have been made by `cameras[i]`. Visibility flags are not consulted:
/// callers only pass the views in which the point was seen.
pub trait Triangulator<P: ObservedPoint> {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<P>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError>;
}

/// Checks the shape shared by every triangulation method.
pub fn check_views<P, C>(
    observations: &[Observation<P>],
    cameras: &[C],
) -> Result<(), TriangulationError> {
    if observations.len() != cameras.len() {
        return Err(TriangulationError::CountMismatch {
            observations: observations.len(),
            cameras: cameras.len(),
        });
    }
    if cameras.len() < 2 {
        return Err(TriangulationError::NotEnoughCameras(cameras.len()));
    }
    Ok(())
}

/// Brings every observation to the unit focal plane of its camera.
pub fn focal_plane_points<P, C>(
    observations: &[Observation<P>],
    cameras: &[C],
    undistortion: Undistortion,
) -> Result<Vec<FocalPlanePoint>, TriangulationError>
where
    P: ObservedPoint,
    C: CameraModel,
{
    observations
        .iter()
        .zip(cameras)
        .enumerate()
        .map(|(ix, (observation, camera))| {
            observation
                .point
                .focal_plane(camera, undistortion)
                .ok_or(TriangulationError::Unprojectable(ix))
        })
        .collect()
}

/// Runs a two-view solver and maps its result from the frame of the first camera into the
/// world.
fn triangulate_pair_of_views<P, C>(
    observations: &[Observation<P>],
    cameras: &[C],
    undistortion: Undistortion,
    solve: impl FnOnce(
        FocalPlanePoint,
        FocalPlanePoint,
        &C,
        &C,
    ) -> Result<(Point3<f64>, f64), TriangulationError>,
) -> Result<Triangulation, TriangulationError>
where
    P: ObservedPoint,
    C: CameraModel,
{
    check_views(observations, cameras)?;
    if cameras.len() != 2 {
        return Err(TriangulationError::CameraCount {
            expected: 2,
            actual: cameras.len(),
        });
    }
    let focal = focal_plane_points(observations, cameras, undistortion)?;
    let (point, residual) = solve(focal[0], focal[1], &cameras[0], &cameras[1])?;
    let point = cameras[0].inv_extrinsic().isometry() * point;
    debug!("two-view triangulation gave {:?} with residual {}", point, residual);
    Ok(Triangulation::closed_form(point, residual))
}

/// The analytic depth solution of Horaud.
///
/// With `P` the pose of the first camera in the frame of the second, the depth along the ray of
/// the first observation `(x, y, 1)` solves the `x` coordinate constraint of the second view:
///
/// ```text
/// alpha = x P00 + y P01 + P02
/// beta  = x P20 + y P21 + P22
/// z     = (P03 - P23 x2) / (beta x2 - alpha)
/// ```
///
/// It is the fastest method and ignores the `y` coordinate of the second view, which makes it
/// unstable when `beta x2 - alpha` gets small (cameras displaced vertically). Its residual is
/// `|beta x2 - alpha| / |z|`.
///
/// It needs exactly two views.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Horaud {
    pub undistortion: Undistortion,
    pub epsilon: f64,
    pub baseline_epsilon: f64,
}

impl Horaud {
    /// Undistorts with [`Undistortion::Approximate`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Undistorts with [`Undistortion::Exact`].
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

    /// Smallest magnitude of the depth denominator that is still solved.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Distance between optical centers under which the pair is rejected.
    #[must_use]
    pub fn baseline_epsilon(self, baseline_epsilon: f64) -> Self {
        Self {
            baseline_epsilon,
            ..self
        }
    }

    /// Solves for the point in the frame of the first camera.
    ///
    /// `first_to_second` maps points from the frame of the first camera to the second.
    pub fn triangulate_pair(
        &self,
        first: FocalPlanePoint,
        second: FocalPlanePoint,
        first_to_second: IsometryMatrix3<f64>,
    ) -> Result<(Point3<f64>, f64), TriangulationError> {
        let p = first_to_second.to_homogeneous();
        if first_to_second.translation.vector.norm() <= self.baseline_epsilon {
            warn!("horaud triangulation rejected a zero baseline");
            return Err(TriangulationError::Degenerate(DegeneracyKind::ZeroBaseline));
        }
        let (x, y, x2) = (first.x, first.y, second.x);
        let alpha = x * p[(0, 0)] + y * p[(0, 1)] + p[(0, 2)];
        let beta = x * p[(2, 0)] + y * p[(2, 1)] + p[(2, 2)];
        let denominator = beta * x2 - alpha;
        if denominator.abs() <= self.epsilon {
            warn!("horaud triangulation hit a vanishing denominator");
            return Err(TriangulationError::Degenerate(
                DegeneracyKind::HoraudDenominator,
            ));
        }
        let z = (p[(0, 3)] - p[(2, 3)] * x2) / denominator;
        let residual = denominator.abs() / z.abs();
        Ok((Point3::new(x * z, y * z, z), residual))
    }
}

impl Default for Horaud {
    fn default() -> Self {
        Self {
            undistortion: Undistortion::Approximate,
            epsilon: 1e-12,
            baseline_epsilon: 1e-9,
        }
    }
}

impl<P: ObservedPoint> Triangulator<P> for Horaud {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<P>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError> {
        triangulate_pair_of_views(
            observations,
            cameras,
            self.undistortion,
            |first, second, a, b| {
                let first_to_second = b.extrinsic().isometry() * a.inv_extrinsic().isometry();
                self.triangulate_pair(first, second, first_to_second)
            },
        )
    }
}

/// The midpoint of the common perpendicular of the two back-projected rays.
///
/// The residual is the length of that perpendicular, i.e. the distance between the two rays.
/// It needs exactly two views.
///
/// ```
/// use mvg_core::nalgebra::{Point2, Point3, Rotation3, Vector3};
/// use mvg_core::{CameraModel, Observation, Pose, Projective, WorldPoint, WorldToCamera};
/// use mvg_geom::{TwoLines, Triangulator};
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
/// let world = Point3::new(10.0, 20.0, 500.0);
/// let observations: Vec<_> = cameras
///     .iter()
///     .map(|c| Observation::new(c.project(WorldPoint::from_point(world)).unwrap()))
///     .collect();
///
/// let triangulation = TwoLines::new().triangulate(&observations, &cameras).unwrap();
/// assert!((triangulation.point - world).norm() < 1e-6);
/// assert!(triangulation.residual < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TwoLines {
    pub undistortion: Undistortion,
    pub epsilon: f64,
    pub baseline_epsilon: f64,
}

impl TwoLines {
    /// Undistorts with [`Undistortion::Approximate`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Undistorts with [`Undistortion::Exact`].
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

    /// Smallest sine of the angle between the rays that is still solved.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Distance between optical centers under which the pair is rejected.
    #[must_use]
    pub fn baseline_epsilon(self, baseline_epsilon: f64) -> Self {
        Self {
            baseline_epsilon,
            ..self
        }
    }

    /// Solves for the point in the frame of the first camera.
    ///
    /// `second_to_first` maps points from the frame of the second camera to the first.
    pub fn triangulate_pair(
        &self,
        first: FocalPlanePoint,
        second: FocalPlanePoint,
        second_to_first: IsometryMatrix3<f64>,
    ) -> Result<(Point3<f64>, f64), TriangulationError> {
        let c2 = second_to_first.translation.vector;
        if c2.norm() <= self.baseline_epsilon {
            warn!("two-lines triangulation rejected a zero baseline");
            return Err(TriangulationError::Degenerate(DegeneracyKind::ZeroBaseline));
        }
        let m2 = second_to_first * second.virtual_image_point();
        let m1c1: Vector3<f64> = -first.ray();
        let m2c2: Vector3<f64> = c2 - m2.coords;

        let v = m1c1.cross(&m2c2);
        if v.norm() <= self.epsilon * m1c1.norm() * m2c2.norm() {
            warn!("two-lines triangulation rejected parallel rays");
            return Err(TriangulationError::Degenerate(DegeneracyKind::ParallelRays));
        }

        // The denominators below reduce to |v|² and -|v|².
        let n1 = v.cross(&m1c1);
        let lambda1 = c2.dot(&n1) / m2c2.dot(&n1);
        let i = c2 - lambda1 * m2c2;

        let n2 = v.cross(&m2c2);
        let lambda2 = c2.dot(&n2) / -m1c1.dot(&n2);
        let j = -lambda2 * m1c1;

        Ok((Point3::from((i + j) * 0.5), (i - j).norm()))
    }
}

impl Default for TwoLines {
    fn default() -> Self {
        Self {
            undistortion: Undistortion::Approximate,
            epsilon: 1e-12,
            baseline_epsilon: 1e-9,
        }
    }
}

impl<P: ObservedPoint> Triangulator<P> for TwoLines {
    fn triangulate<C: CameraModel + Clone>(
        &self,
        observations: &[Observation<P>],
        cameras: &[C],
    ) -> Result<Triangulation, TriangulationError> {
        triangulate_pair_of_views(
            observations,
            cameras,
            self.undistortion,
            |first, second, a, b| {
                let second_to_first = a.extrinsic().isometry() * b.inv_extrinsic().isometry();
                self.triangulate_pair(first, second, second_to_first)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvg_core::nalgebra::{Point2, Rotation3, Translation3};
    use mvg_core::{PixelPoint, Projective, WorldPoint, WorldToCamera};
    use mvg_pinhole::{CameraIntrinsics, PinholeCamera};

    fn camera_at(center: Vector3<f64>) -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::identity()
                .focal(1000.0)
                .principal_point(Point2::new(320.0, 240.0)),
        )
        .with_extrinsic(WorldToCamera::from_parts(-center, Rotation3::identity()))
    }

    fn stereo_rig() -> [PinholeCamera; 2] {
        [
            camera_at(Vector3::zeros()),
            camera_at(Vector3::new(100.0, 0.0, 0.0)),
        ]
    }

    fn observe(cameras: &[PinholeCamera], world: Point3<f64>) -> Vec<Observation<PixelPoint>> {
        cameras
            .iter()
            .map(|c| Observation::new(c.project(WorldPoint::from_point(world)).unwrap()))
            .collect()
    }

    #[test]
    fn two_lines_on_horizontal_stereo() {
        let cameras = stereo_rig();
        let world = Point3::new(10.0, 20.0, 500.0);
        let observations = observe(&cameras, world);
        assert_relative_eq!(observations[0].point.0, Point2::new(340.0, 280.0), epsilon = 1e-9);
        assert_relative_eq!(observations[1].point.0, Point2::new(140.0, 280.0), epsilon = 1e-9);

        let triangulation = TwoLines::new().triangulate(&observations, &cameras).unwrap();
        assert_relative_eq!(triangulation.point, world, epsilon = 1e-3);
        assert!(triangulation.residual < 1e-6);
        assert_eq!(triangulation.log, vec![triangulation.residual]);
    }

    #[test]
    fn horaud_on_horizontal_stereo() {
        let cameras = stereo_rig();
        let world = Point3::new(10.0, 20.0, 500.0);
        let observations = observe(&cameras, world);
        let triangulation = Horaud::perfect()
            .triangulate(&observations, &cameras)
            .unwrap();
        assert_relative_eq!(triangulation.point, world, epsilon = 1e-6);
        assert_relative_eq!(triangulation.residual, 0.2 / 500.0, epsilon = 1e-9);
    }

    #[test]
    fn rotated_rig_with_focal_plane_points() {
        let a = WorldToCamera::from_parts(
            Vector3::new(5.0, -3.0, 2.0),
            Rotation3::from_scaled_axis(Vector3::new(0.02, 0.1, -0.03)),
        );
        let b = WorldToCamera::from_parts(
            Vector3::new(-60.0, 4.0, 10.0),
            Rotation3::from_scaled_axis(Vector3::new(-0.01, -0.15, 0.02)),
        );
        let cameras = [
            PinholeCamera::new(CameraIntrinsics::identity()).with_extrinsic(a),
            PinholeCamera::new(CameraIntrinsics::identity()).with_extrinsic(b),
        ];
        let world = Point3::new(-12.0, 7.0, 300.0);
        let observations: Vec<Observation<FocalPlanePoint>> = cameras
            .iter()
            .map(|c| {
                let v = c.extrinsic.transform(WorldPoint::from_point(world));
                Observation::new(FocalPlanePoint::from_camera_vector(v.bearing_unnormalized()).unwrap())
            })
            .collect();
        for triangulation in [
            TwoLines::new().triangulate(&observations, &cameras).unwrap(),
            Horaud::new().triangulate(&observations, &cameras).unwrap(),
        ] {
            assert_relative_eq!(triangulation.point, world, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_baseline_is_rejected() {
        let cameras = [camera_at(Vector3::zeros()), camera_at(Vector3::zeros())];
        let observations = vec![
            Observation::new(PixelPoint::new(340.0, 280.0)),
            Observation::new(PixelPoint::new(341.0, 280.5)),
        ];
        assert_eq!(
            TwoLines::new().triangulate(&observations, &cameras),
            Err(TriangulationError::Degenerate(DegeneracyKind::ZeroBaseline))
        );
        assert_eq!(
            Horaud::new().triangulate(&observations, &cameras),
            Err(TriangulationError::Degenerate(DegeneracyKind::ZeroBaseline))
        );
    }

    #[test]
    fn parallel_rays_are_rejected() {
        let cameras = stereo_rig();
        let observations = vec![
            Observation::new(PixelPoint::new(320.0, 240.0)),
            Observation::new(PixelPoint::new(320.0, 240.0)),
        ];
        assert_eq!(
            TwoLines::new().triangulate(&observations, &cameras),
            Err(TriangulationError::Degenerate(DegeneracyKind::ParallelRays))
        );
    }

    #[test]
    fn vertical_baseline_breaks_horaud() {
        let cameras = [
            camera_at(Vector3::zeros()),
            camera_at(Vector3::new(0.0, 100.0, 0.0)),
        ];
        let observations = observe(&cameras, Point3::new(0.0, 20.0, 500.0));
        assert_eq!(
            Horaud::new().triangulate(&observations, &cameras),
            Err(TriangulationError::Degenerate(
                DegeneracyKind::HoraudDenominator
            ))
        );
        assert!(TwoLines::new().triangulate(&observations, &cameras).is_ok());
    }

    #[test]
    fn shape_is_checked() {
        let cameras = stereo_rig();
        let observations = vec![Observation::new(PixelPoint::new(0.0, 0.0))];
        assert_eq!(
            TwoLines::new().triangulate(&observations, &cameras),
            Err(TriangulationError::CountMismatch {
                observations: 1,
                cameras: 2
            })
        );
        assert_eq!(
            Horaud::new().triangulate(&observations, &cameras[..1]),
            Err(TriangulationError::NotEnoughCameras(1))
        );
    }

    #[test]
    fn closed_forms_need_two_views() {
        let cameras = [
            camera_at(Vector3::zeros()),
            camera_at(Vector3::new(100.0, 0.0, 0.0)),
            camera_at(Vector3::new(0.0, 100.0, 0.0)),
        ];
        let observations = observe(&cameras, Point3::new(0.0, 20.0, 500.0));
        let expected = Err(TriangulationError::CameraCount {
            expected: 2,
            actual: 3,
        });
        assert_eq!(TwoLines::new().triangulate(&observations, &cameras), expected);
        assert_eq!(Horaud::new().triangulate(&observations, &cameras), expected);
    }

    #[test]
    fn pair_solution_in_first_camera_frame() {
        let second_to_first = IsometryMatrix3::from_parts(
            Translation3::new(1.0, 0.0, 0.0),
            Rotation3::identity(),
        );
        let point = Point3::new(0.2, -0.1, 4.0);
        let first = FocalPlanePoint::from_camera_vector(point.coords).unwrap();
        let second = FocalPlanePoint::from_camera_vector(
            (second_to_first.inverse() * point).coords,
        )
        .unwrap();
        let (solved, residual) = TwoLines::new()
            .triangulate_pair(first, second, second_to_first)
            .unwrap();
        assert_relative_eq!(solved, point, epsilon = 1e-12);
        assert_relative_eq!(residual, 0.0, epsilon = 1e-12);
    }
}
