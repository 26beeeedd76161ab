use crate::HomographyError;
use average::Mean;
use float_ord::FloatOrd;
use log::*;
use mvg_core::nalgebra::{DMatrix, IsometryMatrix3, Matrix3, Point2, Point3, Translation3, Vector3};
use mvg_core::{
    closest_rotation, CameraModel, PixelPoint, PlanarPoint, Pose, Projective, RigidTransform,
    Undistortion, WorldPoint,
};

/// A planar homography mapping model points `(X, Y, 1)` onto image points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    /// Scaled so that its first column has unit norm, and so that the first model point lands in
    /// front of the camera.
    pub matrix: Matrix3<f64>,
    /// Mean distance between the image points and the transferred model points.
    pub mean_reprojection_error: f64,
}

impl Homography {
    /// Maps a model point onto the image. Returns `None` for points sent to infinity.
    pub fn transfer(&self, model: Point2<f64>) -> Option<Point2<f64>> {
        Point2::from_homogeneous(self.matrix * model.to_homogeneous())
    }
}

/// The rigid pose of a planar model recovered from the homography between the model plane and the
/// unit focal plane of a calibrated camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomographyRegistration {
    /// Maps the model frame into the world frame.
    pub transform: RigidTransform,
    /// Mean pixel distance between the image points and the projected model points.
    pub mean_reprojection_error: f64,
    /// Norm of the second column of the homography. It should be close to `1` for a good fit,
    /// since the first column is normalized.
    pub second_column_norm: f64,
}

/// Hartley normalization of a point set: centering on the mean and scaling so that the mean
/// distance to the center becomes `sqrt(2)`.
#[derive(Debug, Clone, Copy)]
struct Normalization {
    mean: Point2<f64>,
    scale: f64,
}

impl Normalization {
    fn identity() -> Self {
        Self {
            mean: Point2::origin(),
            scale: 1.0,
        }
    }

    fn new(points: &[Point2<f64>]) -> Result<Self, HomographyError> {
        let x: Mean = points.iter().map(|p| p.x).collect();
        let y: Mean = points.iter().map(|p| p.y).collect();
        let mean = Point2::new(x.mean(), y.mean());
        let distance: Mean = points.iter().map(|p| (p - mean).norm()).collect();
        let scale = distance.mean() / std::f64::consts::SQRT_2;
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(HomographyError::Degenerate);
        }
        Ok(Self { mean, scale })
    }

    fn apply(&self, point: Point2<f64>) -> Point2<f64> {
        Point2::from((point - self.mean) / self.scale)
    }

    #[rustfmt::skip]
    fn matrix(&self) -> Matrix3<f64> {
        let s = 1.0 / self.scale;
        Matrix3::new(
            s,   0.0, -self.mean.x * s,
            0.0, s,   -self.mean.y * s,
            0.0, 0.0, 1.0,
        )
    }

    #[rustfmt::skip]
    fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.scale, 0.0,        self.mean.x,
            0.0,        self.scale, self.mean.y,
            0.0,        0.0,        1.0,
        )
    }
}

fn check_counts(image: usize, model: usize) -> Result<(), HomographyError> {
    if image != model {
        return Err(HomographyError::CountMismatch { image, model });
    }
    if image < 4 {
        return Err(HomographyError::NotEnoughPoints(image));
    }
    Ok(())
}

/// Direct linear transform estimating `H` with `image ~ H (X, Y, 1)`.
fn dlt(
    image: &[Point2<f64>],
    model: &[Point2<f64>],
    normalize: bool,
) -> Result<Matrix3<f64>, HomographyError> {
    let (image_norm, model_norm) = if normalize {
        (Normalization::new(image)?, Normalization::new(model)?)
    } else {
        (Normalization::identity(), Normalization::identity())
    };

    // Padded with zero rows so that four correspondences still leave a null vector to find.
    let n = image.len();
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (ix, (&m, &p)) in image.iter().zip(model).enumerate() {
        let m = image_norm.apply(m);
        let p = model_norm.apply(p);
        let (x, y) = (p.x, p.y);
        let (u, v) = (m.x, m.y);
        a.row_mut(2 * ix)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u]);
        a.row_mut(2 * ix + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v]);
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::Degenerate)?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by_key(|&(_, &s)| FloatOrd(s))
        .ok_or(HomographyError::Degenerate)?;
    let null = v_t.row(smallest);
    let normalized = Matrix3::from_row_slice(&null.iter().copied().collect::<Vec<_>>());

    let mut h = image_norm.inverse_matrix() * normalized * model_norm.matrix();
    let scale = h.column(0).norm();
    if !(scale > 0.0) || !scale.is_finite() {
        return Err(HomographyError::Degenerate);
    }
    h /= scale;
    // The first model point must land in front of the camera.
    if (h * model[0].to_homogeneous()).z < 0.0 {
        h = -h;
    }
    Ok(h)
}

/// Estimates the homography between a planar model and its image, without any knowledge of the
/// camera. Only the `x` and `y` coordinates of the model points are used.
///
/// When `normalize` is set, both point sets are first normalized as in Hartley's "In defense of
/// the eight-point algorithm", which greatly improves the conditioning of the SVD.
///
/// ```
/// use mvg_core::nalgebra::{Matrix3, Point2};
/// use mvg_geom::planar_homography_unknown_intrinsic;
///
/// let model = [
///     Point2::new(0.0, 0.0),
///     Point2::new(1.0, 0.0),
///     Point2::new(1.0, 1.0),
///     Point2::new(0.0, 1.0),
/// ];
/// let image: Vec<Point2<f64>> = model
///     .iter()
///     .map(|p| Point2::new(2.0 * p.x + 10.0, 3.0 * p.y - 5.0))
///     .collect();
/// let homography = planar_homography_unknown_intrinsic(&image, &model, true).unwrap();
/// let expected = Matrix3::new(2.0, 0.0, 10.0, 0.0, 3.0, -5.0, 0.0, 0.0, 1.0) / 2.0;
/// assert!((homography.matrix - expected).norm() < 1e-9);
/// assert!(homography.mean_reprojection_error < 1e-9);
/// ```
pub fn planar_homography_unknown_intrinsic<I, M>(
    image: &[I],
    model: &[M],
    normalize: bool,
) -> Result<Homography, HomographyError>
where
    I: PlanarPoint,
    M: PlanarPoint,
{
    check_counts(image.len(), model.len())?;
    let image: Vec<Point2<f64>> = image.iter().map(PlanarPoint::planar).collect();
    let model: Vec<Point2<f64>> = model.iter().map(PlanarPoint::planar).collect();
    let matrix = dlt(&image, &model, normalize)?;

    let mut homography = Homography {
        matrix,
        mean_reprojection_error: 0.0,
    };
    let error: Mean = image
        .iter()
        .zip(&model)
        .filter_map(|(m, &p)| homography.transfer(p).map(|t| (t - m).norm()))
        .collect();
    homography.mean_reprojection_error = error.mean();
    debug!(
        "homography estimated with mean transfer error {}",
        homography.mean_reprojection_error
    );
    Ok(homography)
}

/// Recovers the pose of a planar model (lying in its own `z = 0` plane) seen by one calibrated
/// camera.
///
/// The pixels are brought to the unit focal plane, where the homography is `[r1 r2 t]`. The
/// rotation is completed with `r1 × r2` and projected onto the closest rotation, and the result
/// is composed with the camera pose so that the transform maps the model into the world.
///
/// This is meant as an initializer for an iterative registration.
pub fn planar_homography_registration<C, M>(
    camera: &C,
    image: &[PixelPoint],
    model: &[M],
    normalize: bool,
) -> Result<HomographyRegistration, HomographyError>
where
    C: CameraModel,
    M: PlanarPoint,
{
    if !camera.is_intrinsic_calibrated() {
        return Err(HomographyError::UncalibratedCamera);
    }
    check_counts(image.len(), model.len())?;
    let focal: Vec<Point2<f64>> = image
        .iter()
        .enumerate()
        .map(|(ix, &pixel)| {
            camera
                .pixel_to_unit_focal_plane(pixel, Undistortion::Approximate)
                .map(|f| f.0)
                .ok_or(HomographyError::Unprojectable(ix))
        })
        .collect::<Result<_, _>>()?;
    let planar: Vec<Point2<f64>> = model.iter().map(PlanarPoint::planar).collect();
    let h = dlt(&focal, &planar, normalize)?;

    let r1: Vector3<f64> = h.column(0).into_owned();
    let r2: Vector3<f64> = h.column(1).into_owned();
    let pseudo_rotation = Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]);
    let rotation = closest_rotation(&pseudo_rotation).ok_or(HomographyError::Degenerate)?;
    let model_to_camera =
        IsometryMatrix3::from_parts(Translation3::from(h.column(2).into_owned()), rotation);
    let transform = RigidTransform::from(camera.inv_extrinsic().isometry() * model_to_camera);

    let error: Mean = image
        .iter()
        .zip(model)
        .filter_map(|(pixel, point)| {
            let point = Point3::new(point.x(), point.y(), 0.0);
            let world = transform.transform(WorldPoint::from_point(point));
            camera.project(world).map(|p| (p.0 - pixel.0).norm())
        })
        .collect();
    let registration = HomographyRegistration {
        transform,
        mean_reprojection_error: error.mean(),
        second_column_norm: r2.norm(),
    };
    debug!(
        "homography registration with mean reprojection error {} and second column norm {}",
        registration.mean_reprojection_error, registration.second_column_norm
    );
    Ok(registration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvg_core::nalgebra::Rotation3;
    use mvg_core::WorldToCamera;
    use mvg_pinhole::{CameraIntrinsics, PinholeCamera};

    fn grid() -> Vec<Point3<f64>> {
        (0..4)
            .flat_map(|i| (0..3).map(move |j| Point3::new(i as f64 * 20.0, j as f64 * 20.0, 0.0)))
            .collect()
    }

    #[test]
    fn recovers_affine_map() {
        let model = grid();
        let image: Vec<Point2<f64>> = model
            .iter()
            .map(|p| Point2::new(0.5 * p.x - 0.2 * p.y + 100.0, 0.1 * p.x + 0.7 * p.y + 40.0))
            .collect();
        for normalize in [false, true] {
            let homography = planar_homography_unknown_intrinsic(&image, &model, normalize).unwrap();
            let scale = (0.5f64.powi(2) + 0.1f64.powi(2)).sqrt();
            let expected = Matrix3::new(0.5, -0.2, 100.0, 0.1, 0.7, 40.0, 0.0, 0.0, 1.0) / scale;
            assert_relative_eq!(homography.matrix, expected, epsilon = 1e-6);
            assert!(homography.mean_reprojection_error < 1e-6);
        }
    }

    #[test]
    fn sign_keeps_first_point_in_front() {
        let model = grid();
        let image: Vec<Point2<f64>> = model.iter().map(|p| Point2::new(p.x + 1.0, p.y)).collect();
        let homography = planar_homography_unknown_intrinsic(&image, &model, true).unwrap();
        assert!((homography.matrix * model[0].planar().to_homogeneous()).z > 0.0);
    }

    #[test]
    fn point_counts_are_checked() {
        let model = grid();
        assert_eq!(
            planar_homography_unknown_intrinsic(&model[..3], &model[..3], true),
            Err(HomographyError::NotEnoughPoints(3))
        );
        assert_eq!(
            planar_homography_unknown_intrinsic(&model[..5], &model[..4], true),
            Err(HomographyError::CountMismatch { image: 5, model: 4 })
        );
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let model = vec![Point2::new(1.0, 1.0); 4];
        assert_eq!(
            planar_homography_unknown_intrinsic(&model, &model, true),
            Err(HomographyError::Degenerate)
        );
    }

    #[test]
    fn registration_recovers_pose() {
        let camera = PinholeCamera::new(
            CameraIntrinsics::identity()
                .focal(800.0)
                .principal_point(Point2::new(320.0, 240.0)),
        )
        .with_extrinsic(WorldToCamera::from_parts(
            Vector3::new(10.0, -5.0, 20.0),
            Rotation3::from_scaled_axis(Vector3::new(0.0, 0.05, 0.0)),
        ));
        let truth = RigidTransform::from_parts(
            Vector3::new(-20.0, -15.0, 400.0),
            Rotation3::from_scaled_axis(Vector3::new(0.3, -0.2, 0.1)),
        );
        let model = grid();
        let image: Vec<PixelPoint> = model
            .iter()
            .map(|&p| camera.project(truth.transform(WorldPoint::from_point(p))).unwrap())
            .collect();
        let registration = planar_homography_registration(&camera, &image, &model, true).unwrap();
        assert_relative_eq!(
            registration.transform.isometry.to_homogeneous(),
            truth.isometry.to_homogeneous(),
            epsilon = 1e-6
        );
        assert!(registration.mean_reprojection_error < 1e-6);
        assert_relative_eq!(registration.second_column_norm, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn registration_needs_calibration() {
        let camera = PinholeCamera::new(CameraIntrinsics::identity()).calibrated(false);
        let model = grid();
        let image: Vec<PixelPoint> = model.iter().map(|p| PixelPoint::new(p.x, p.y)).collect();
        assert_eq!(
            planar_homography_registration(&camera, &image, &model, true),
            Err(HomographyError::UncalibratedCamera)
        );
    }
}
