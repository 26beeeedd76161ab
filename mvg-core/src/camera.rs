use crate::{
    CameraToWorld, FocalPlanePoint, ImagePoint, Line3, PixelPoint, Pose, Projective, WorldPoint,
    WorldToCamera,
};
use nalgebra::{Point2, Point3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How lens distortion is removed when going from pixels to the unit focal plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Undistortion {
    /// Keep the distorted coordinates; only the intrinsic matrix is inverted.
    None,
    /// Cheap fixed-point inversion of the distortion model.
    Approximate,
    /// Inversion of the distortion model to machine precision.
    Exact,
}

/// The capability of a calibrated camera, as consumed by triangulation and registration.
///
/// Cameras are owned by the caller. All operations are pure queries.
pub trait CameraModel {
    /// Whether the intrinsic parameters were calibrated.
    fn is_intrinsic_calibrated(&self) -> bool;

    /// Identifier of the acquisition plane the camera belongs to.
    fn plane(&self) -> usize;

    /// Pose of the world relative to the camera.
    fn extrinsic(&self) -> WorldToCamera;

    /// Pose of the camera in the world.
    fn inv_extrinsic(&self) -> CameraToWorld {
        self.extrinsic().inverse()
    }

    /// Projects a world point onto the image, applying the distortion model.
    ///
    /// Fails when the point lies in the plane of the optical center.
    fn project(&self, point: WorldPoint) -> Option<PixelPoint>;

    /// Converts a pixel to the unit focal plane of the camera.
    fn pixel_to_unit_focal_plane(
        &self,
        pixel: PixelPoint,
        undistortion: Undistortion,
    ) -> Option<FocalPlanePoint>;

    /// The world ray from the optical center through the given focal plane point.
    fn projective_line(&self, point: FocalPlanePoint) -> Option<Line3> {
        let pose = self.inv_extrinsic();
        let direction = pose.0.rotation * point.ray();
        Line3::new(Point3::from(pose.center()), direction)
    }
}

impl<C: CameraModel> CameraModel for &C {
    fn is_intrinsic_calibrated(&self) -> bool {
        (**self).is_intrinsic_calibrated()
    }

    fn plane(&self) -> usize {
        (**self).plane()
    }

    fn extrinsic(&self) -> WorldToCamera {
        (**self).extrinsic()
    }

    fn inv_extrinsic(&self) -> CameraToWorld {
        (**self).inv_extrinsic()
    }

    fn project(&self, point: WorldPoint) -> Option<PixelPoint> {
        (**self).project(point)
    }

    fn pixel_to_unit_focal_plane(
        &self,
        pixel: PixelPoint,
        undistortion: Undistortion,
    ) -> Option<FocalPlanePoint> {
        (**self).pixel_to_unit_focal_plane(pixel, undistortion)
    }

    fn projective_line(&self, point: FocalPlanePoint) -> Option<Line3> {
        (**self).projective_line(point)
    }
}

/// A point type an observation can be expressed in.
///
/// This replaces a runtime "is this in pixels" flag: each point type knows how to reach the unit
/// focal plane and how a world point reprojects into its own frame.
pub trait ObservedPoint: ImagePoint + Copy {
    /// The observation on the unit focal plane of `camera`.
    fn focal_plane<C: CameraModel>(
        &self,
        camera: &C,
        undistortion: Undistortion,
    ) -> Option<FocalPlanePoint>;

    /// Reprojection of a world point into the frame of this point type.
    fn reproject<C: CameraModel>(camera: &C, point: WorldPoint) -> Option<Point2<f64>>;
}

impl ObservedPoint for PixelPoint {
    fn focal_plane<C: CameraModel>(
        &self,
        camera: &C,
        undistortion: Undistortion,
    ) -> Option<FocalPlanePoint> {
        camera.pixel_to_unit_focal_plane(*self, undistortion)
    }

    fn reproject<C: CameraModel>(camera: &C, point: WorldPoint) -> Option<Point2<f64>> {
        camera.project(point).map(|p| p.0)
    }
}

impl ObservedPoint for FocalPlanePoint {
    fn focal_plane<C: CameraModel>(&self, _: &C, _: Undistortion) -> Option<FocalPlanePoint> {
        Some(*self)
    }

    fn reproject<C: CameraModel>(camera: &C, point: WorldPoint) -> Option<Point2<f64>> {
        let camera_point = camera.extrinsic().transform(point);
        FocalPlanePoint::from_camera_vector(camera_point.bearing_unnormalized()).map(|p| p.0)
    }
}
