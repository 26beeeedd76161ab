//! This crate plugs into `mvg-core` and provides a pinhole camera model with Brown distortion.
//! It converts pixels into points on the unit focal plane (and from there into world rays) and
//! projects world points back onto the image through the
//! [`CameraModel`](mvg_core::CameraModel) trait.

mod camera;
mod distortion;

pub use camera::*;
pub use distortion::*;

use mvg_core::nalgebra::{Matrix3, Point2, Vector2};
use mvg_core::{FocalPlanePoint, ImagePoint, PixelPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// The skew is the raw `K[0][1]` entry of the intrinsic matrix. A skew expressed as an angle
/// coefficient `alpha_c` (pixel axes at `acos(alpha_c)`) corresponds to `skew = fx * alpha_c`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    #[must_use]
    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Applies the inverse intrinsic matrix to an image point.
    ///
    /// The result is still distorted.
    ///
    /// ```
    /// use mvg_core::PixelPoint;
    /// use mvg_core::nalgebra::{Point2, Vector2};
    /// use mvg_pinhole::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = PixelPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let distance = (kp.to_homogeneous() - intrinsics.matrix() * nkp.to_homogeneous()).norm();
    /// assert!(distance < 1e-9);
    /// ```
    pub fn calibrate<P>(&self, point: P) -> FocalPlanePoint
    where
        P: ImagePoint,
    {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        FocalPlanePoint(Point2::new(x, y))
    }

    /// Converts a (distorted) [`FocalPlanePoint`] back into pixel coordinates.
    ///
    /// ```
    /// use mvg_core::PixelPoint;
    /// use mvg_core::nalgebra::{Point2, Vector2};
    /// use mvg_pinhole::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = PixelPoint(Point2::new(471.0, 322.0));
    /// let ukp = intrinsics.uncalibrate(intrinsics.calibrate(kp));
    /// assert!((kp.0 - ukp.0).norm() < 1e-6);
    /// ```
    pub fn uncalibrate(&self, projection: FocalPlanePoint) -> PixelPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        PixelPoint(Point2::new(x, y) + self.principal_point.coords)
    }

    /// Whether the focal lengths allow inverting the intrinsic matrix.
    pub fn is_invertible(&self) -> bool {
        self.focals.x != 0.0 && self.focals.y != 0.0 && self.focals.iter().all(|f| f.is_finite())
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::identity()
    }
}
