use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point2, Point3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Anything that exposes planar `x` and `y` coordinates.
///
/// This is what the homography estimators consume: image points, points on the unit focal plane,
/// and the (planar) points of a calibration pattern, whose `z` component is ignored.
pub trait PlanarPoint {
    fn x(&self) -> f64;
    fn y(&self) -> f64;

    fn planar(&self) -> Point2<f64> {
        Point2::new(self.x(), self.y())
    }
}

/// Allows the retrieval of the point on the image the observation came from.
pub trait ImagePoint {
    /// Retrieves the point on the image
    fn image_point(&self) -> Point2<f64>;
}

/// A point on an image frame in pixel coordinates.
/// It is neither undistorted nor normalized by the camera intrinsics.
///
/// For calibrated coordinates, use [`FocalPlanePoint`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PixelPoint(pub Point2<f64>);

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Point2::new(x, y))
    }
}

impl ImagePoint for PixelPoint {
    fn image_point(&self) -> Point2<f64> {
        self.0
    }
}

/// A point on the unit focal plane of a camera: the intrinsic matrix has been inverted and,
/// unless requested otherwise, the lens distortion removed.
///
/// Appending a `1.0` gives the direction of the ray leaving the optical center in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FocalPlanePoint(pub Point2<f64>);

impl FocalPlanePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Point2::new(x, y))
    }

    /// Perspective division of a camera-frame vector.
    ///
    /// Returns `None` when the vector lies in the plane of the optical center.
    pub fn from_camera_vector(v: Vector3<f64>) -> Option<Self> {
        if v.z == 0.0 {
            None
        } else {
            Some(Self(Point2::new(v.x / v.z, v.y / v.z)))
        }
    }

    /// Get the virtual image point as a [`Point3`] on the plane `z = 1`.
    pub fn virtual_image_point(self) -> Point3<f64> {
        self.0.coords.push(1.0).into()
    }

    /// Same as [`FocalPlanePoint::virtual_image_point`], as a vector.
    pub fn ray(self) -> Vector3<f64> {
        self.0.coords.push(1.0)
    }
}

impl ImagePoint for FocalPlanePoint {
    fn image_point(&self) -> Point2<f64> {
        self.0
    }
}

impl PlanarPoint for PixelPoint {
    fn x(&self) -> f64 {
        self.0.x
    }

    fn y(&self) -> f64 {
        self.0.y
    }
}

impl PlanarPoint for FocalPlanePoint {
    fn x(&self) -> f64 {
        self.0.x
    }

    fn y(&self) -> f64 {
        self.0.y
    }
}

impl PlanarPoint for Point2<f64> {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

impl PlanarPoint for Point3<f64> {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

impl<T: PlanarPoint> PlanarPoint for &T {
    fn x(&self) -> f64 {
        (**self).x()
    }

    fn y(&self) -> f64 {
        (**self).y()
    }
}
