use crate::PlanarPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix2, Matrix3, Point3, Unit, Vector3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented for homogeneous projective 3d coordinate.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// Retrieve the homogeneous vector.
    ///
    /// No constraints are put on this vector. All components can move freely and it is not normalized.
    fn homogeneous(self) -> Vector4<f64>;

    /// Retrieve the euclidean 3d point by normalizing the homogeneous coordinate.
    ///
    /// This may fail, as a homogeneous coordinate can exist at near-infinity,
    /// whereas a 3d euclidean point cannot.
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    /// Convert the euclidean 3d point into homogeneous coordinates.
    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// Retrieve the normalized bearing of the coordinate.
    fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Retrieve the unnormalized bearing of the coordinate.
    fn bearing_unnormalized(self) -> Vector3<f64> {
        self.homogeneous().xyz()
    }
}

/// A 3d point which is relative to the camera's optical center and orientation where
/// the positive X axis is right, positive Y axis is down, and positive Z axis is forwards
/// from the optical center of the camera.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Vector4<f64>);

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A point in world coordinates, the frame in which all cameras of a rig were calibrated.
///
/// Model points handed to registration are also carried as `WorldPoint`s: the model frame
/// and the world frame are both euclidean frames with the same unit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Vector4<f64>);

impl Projective for WorldPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A 2d observation of some point type `P` on one camera.
///
/// The covariance is expressed in the frame of `P` (pixels² for a [`PixelPoint`](crate::PixelPoint)).
/// A missing or zero covariance marks a perfect observation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Observation<P> {
    pub point: P,
    pub visible: bool,
    pub covariance: Option<Matrix2<f64>>,
}

impl<P> Observation<P> {
    /// A visible observation without covariance.
    pub fn new(point: P) -> Self {
        Self {
            point,
            visible: true,
            covariance: None,
        }
    }

    /// An observation that was not seen by the camera. It is skipped by every criterion.
    pub fn hidden(point: P) -> Self {
        Self {
            point,
            visible: false,
            covariance: None,
        }
    }

    #[must_use]
    pub fn covariance(self, covariance: Matrix2<f64>) -> Self {
        Self {
            covariance: Some(covariance),
            ..self
        }
    }

    #[must_use]
    pub fn visible(self, visible: bool) -> Self {
        Self { visible, ..self }
    }

    /// The covariance if it exists and is not the zero matrix.
    pub fn informative_covariance(&self) -> Option<Matrix2<f64>> {
        self.covariance.filter(|c| !c.iter().all(|&n| n == 0.0))
    }

    /// The inverse covariance, falling back to the identity when the covariance
    /// is missing, zero or singular.
    pub fn information(&self) -> Matrix2<f64> {
        self.informative_covariance()
            .and_then(|c| c.try_inverse())
            .unwrap_or_else(Matrix2::identity)
    }
}

/// A 3d point together with its quality attributes.
///
/// It is both the output of triangulation and the element of a rigid model handed to registration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ScenePoint {
    pub position: Point3<f64>,
    pub visible: bool,
    /// Residual of the estimation, or [`ScenePoint::REJECTED_ERROR`].
    pub error: f64,
    pub covariance: Option<Matrix3<f64>>,
}

impl ScenePoint {
    /// Error value marking a rejected reconstruction.
    pub const REJECTED_ERROR: f64 = -1.0;

    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            visible: true,
            error: 0.0,
            covariance: None,
        }
    }

    /// A point carrying the rejection sentinel.
    pub fn rejected(position: Point3<f64>) -> Self {
        Self {
            position,
            visible: false,
            error: Self::REJECTED_ERROR,
            covariance: None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.error == Self::REJECTED_ERROR
    }

    #[must_use]
    pub fn covariance(self, covariance: Matrix3<f64>) -> Self {
        Self {
            covariance: Some(covariance),
            ..self
        }
    }

    #[must_use]
    pub fn error(self, error: f64) -> Self {
        Self { error, ..self }
    }

    pub fn world(&self) -> WorldPoint {
        WorldPoint::from_point(self.position)
    }

    /// The inverse covariance, falling back to the identity when the covariance
    /// is missing, zero or singular.
    pub fn information(&self) -> Matrix3<f64> {
        self.covariance
            .filter(|c| !c.iter().all(|&n| n == 0.0))
            .and_then(|c| c.try_inverse())
            .unwrap_or_else(Matrix3::identity)
    }
}

impl From<Point3<f64>> for ScenePoint {
    fn from(position: Point3<f64>) -> Self {
        Self::new(position)
    }
}

impl PlanarPoint for ScenePoint {
    fn x(&self) -> f64 {
        self.position.x
    }

    fn y(&self) -> f64 {
        self.position.y
    }
}
