use crate::{BrownDistortion, CameraIntrinsics};
use mvg_core::nalgebra::Point2;
use mvg_core::{
    CameraModel, FocalPlanePoint, PixelPoint, Pose, Projective, Undistortion, WorldPoint,
    WorldToCamera,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A calibrated pinhole camera with Brown distortion, placed in the world by its extrinsic pose.
///
/// A pixel `m` relates to a world point `M` through
///
/// ```text
/// (x, y, z) = extrinsic * M
/// m = K * distort(x / z, y / z)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownDistortion,
    pub extrinsic: WorldToCamera,
    pub plane: usize,
    pub calibrated: bool,
}

impl PinholeCamera {
    /// A calibrated camera at the world origin looking down `+Z`, without distortion.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: BrownDistortion::none(),
            extrinsic: WorldToCamera::identity(),
            plane: 0,
            calibrated: true,
        }
    }

    #[must_use]
    pub fn distortion(self, distortion: BrownDistortion) -> Self {
        Self { distortion, ..self }
    }

    #[must_use]
    pub fn with_extrinsic(self, extrinsic: WorldToCamera) -> Self {
        Self { extrinsic, ..self }
    }

    #[must_use]
    pub fn with_plane(self, plane: usize) -> Self {
        Self { plane, ..self }
    }

    #[must_use]
    pub fn calibrated(self, calibrated: bool) -> Self {
        Self { calibrated, ..self }
    }

    /// Removes distortion from a pixel, returning the undistorted pixel.
    pub fn undistort_pixel(&self, pixel: PixelPoint, undistortion: Undistortion) -> Option<PixelPoint> {
        self.pixel_to_unit_focal_plane(pixel, undistortion)
            .map(|focal| self.intrinsics.uncalibrate(focal))
    }
}

impl CameraModel for PinholeCamera {
    fn is_intrinsic_calibrated(&self) -> bool {
        self.calibrated
    }

    fn plane(&self) -> usize {
        self.plane
    }

    fn extrinsic(&self) -> WorldToCamera {
        self.extrinsic
    }

    fn project(&self, point: WorldPoint) -> Option<PixelPoint> {
        let camera_point = self.extrinsic.transform(point).bearing_unnormalized();
        let focal = FocalPlanePoint::from_camera_vector(camera_point)?;
        let distorted = self.distortion.distort(focal.0.coords);
        Some(self.intrinsics.uncalibrate(FocalPlanePoint(Point2::from(distorted))))
    }

    fn pixel_to_unit_focal_plane(
        &self,
        pixel: PixelPoint,
        undistortion: Undistortion,
    ) -> Option<FocalPlanePoint> {
        if !self.intrinsics.is_invertible() {
            return None;
        }
        let distorted = self.intrinsics.calibrate(pixel).0.coords;
        let undistorted = match undistortion {
            Undistortion::None => distorted,
            Undistortion::Approximate => self.distortion.undistort_approximate(distorted),
            Undistortion::Exact => self.distortion.undistort_exact(distorted),
        };
        undistorted
            .iter()
            .all(|n| n.is_finite())
            .then(|| FocalPlanePoint(Point2::from(undistorted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvg_core::nalgebra::{Point3, Rotation3, Vector3};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::identity()
                .focal(1000.0)
                .principal_point(Point2::new(320.0, 240.0)),
        )
    }

    #[test]
    fn projects_on_axis_point_to_principal_point() {
        let pixel = camera()
            .project(WorldPoint::from_point(Point3::new(0.0, 0.0, 10.0)))
            .unwrap();
        assert_relative_eq!(pixel.0, Point2::new(320.0, 240.0));
    }

    #[test]
    fn projects_known_point() {
        let pixel = camera()
            .project(WorldPoint::from_point(Point3::new(10.0, 20.0, 500.0)))
            .unwrap();
        assert_relative_eq!(pixel.0, Point2::new(340.0, 280.0), epsilon = 1e-9);
    }

    #[test]
    fn point_in_center_plane_does_not_project() {
        assert!(camera()
            .project(WorldPoint::from_point(Point3::new(1.0, 1.0, 0.0)))
            .is_none());
    }

    #[test]
    fn focal_plane_round_trip_with_distortion() {
        let camera = camera()
            .distortion(BrownDistortion::from_coefficients([-0.2, 0.05, 0.001, 0.002, 0.0]))
            .with_extrinsic(WorldToCamera::from_parts(
                Vector3::new(-50.0, 10.0, 30.0),
                Rotation3::from_scaled_axis(Vector3::new(0.05, -0.1, 0.02)),
            ));
        let world = WorldPoint::from_point(Point3::new(40.0, -30.0, 600.0));
        let pixel = camera.project(world).unwrap();
        let focal = camera
            .pixel_to_unit_focal_plane(pixel, Undistortion::Exact)
            .unwrap();
        let expected = FocalPlanePoint::from_camera_vector(
            camera.extrinsic.transform(world).bearing_unnormalized(),
        )
        .unwrap();
        assert_relative_eq!(focal.0, expected.0, epsilon = 1e-12);

        let line = camera.projective_line(focal).unwrap();
        assert!(line.distance(&world.point().unwrap()) < 1e-9);
    }

    #[test]
    fn singular_intrinsics_do_not_unproject() {
        let camera = PinholeCamera::new(CameraIntrinsics::identity().focal(0.0));
        assert!(camera
            .pixel_to_unit_focal_plane(PixelPoint::new(1.0, 2.0), Undistortion::None)
            .is_none());
    }
}
