use crate::{CameraPoint, Projective, WorldPoint};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix3, Matrix4, Rotation3, Vector3, Vector6};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by all the different poses in this library:
///
/// * [`CameraToWorld`] - Transforms [`CameraPoint`] into [`WorldPoint`]
/// * [`WorldToCamera`] - Transforms [`WorldPoint`] into [`CameraPoint`]
/// * [`RigidTransform`] - Transforms a model expressed in its own frame into the world
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type InputPoint: Projective;
    type OutputPoint: Projective;
    type Inverse: Pose;

    /// Retrieve the isometry.
    fn isometry(self) -> IsometryMatrix3<f64>;

    /// Creates a pose with no change in position or orientation.
    fn identity() -> Self {
        IsometryMatrix3::identity().into()
    }

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// Retrieve the homogeneous matrix.
    fn homogeneous(self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Retrieve the se(3) representation of the pose.
    ///
    /// This is the minimal 6-vector used as the parameter vector of every pose optimization,
    /// with the translation before the rotation as a scaled axis (the so(3) log map).
    fn se3(self) -> Vector6<f64> {
        let isometry = self.isometry();
        let t = isometry.translation.vector;
        let r = isometry.rotation.scaled_axis();
        Vector6::new(t.x, t.y, t.z, r.x, r.y, r.z)
    }

    /// Set the se(3) representation of the pose.
    ///
    /// A zero rotation vector gives the identity rotation.
    fn from_se3(se3: Vector6<f64>) -> Self {
        let translation = se3.xyz();
        let rotation = Rotation3::from_scaled_axis(Vector3::new(se3[3], se3[4], se3[5]));
        Self::from_parts(translation, rotation)
    }

    /// Transform the given point to an output point.
    fn transform(self, input: Self::InputPoint) -> Self::OutputPoint {
        (self.isometry().to_homogeneous() * input.homogeneous()).into()
    }
}

/// The extrinsic parameters of a camera: the pose of the world relative to the camera.
/// This maps [`WorldPoint`] into [`CameraPoint`].
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl Pose for WorldToCamera {
    type InputPoint = WorldPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// The inverse extrinsic parameters of a camera: the pose of the camera in the world.
/// This also tells you where the optical center is located.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type InputPoint = CameraPoint;
    type OutputPoint = WorldPoint;
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl CameraToWorld {
    /// The optical center in world coordinates.
    pub fn center(self) -> Vector3<f64> {
        self.0.translation.vector
    }
}

/// A rigid transformation of a 3d model into the world frame.
///
/// Registration produces it along with its quality: the RMS of the final criterion and
/// a standard deviation that is reserved for a future uncertainty estimate and set to `0`.
/// Both are `None` for a transform that did not come out of a registration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RigidTransform {
    pub isometry: IsometryMatrix3<f64>,
    pub rms: Option<f64>,
    pub std_dev: Option<f64>,
}

impl RigidTransform {
    #[must_use]
    pub fn with_quality(self, rms: f64, std_dev: f64) -> Self {
        Self {
            rms: Some(rms),
            std_dev: Some(std_dev),
            ..self
        }
    }

    /// The 3x3 rotation block.
    pub fn rotation(&self) -> Rotation3<f64> {
        self.isometry.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.isometry.translation.vector
    }
}

impl From<IsometryMatrix3<f64>> for RigidTransform {
    fn from(isometry: IsometryMatrix3<f64>) -> Self {
        Self {
            isometry,
            rms: None,
            std_dev: None,
        }
    }
}

impl Pose for RigidTransform {
    type InputPoint = WorldPoint;
    type OutputPoint = WorldPoint;
    type Inverse = RigidTransform;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.isometry
    }
}

/// Projects an arbitrary 3x3 matrix onto the closest rotation in the Frobenius sense.
///
/// With `M = U S Vᵀ`, the result is `U diag(1, 1, det(U Vᵀ)) Vᵀ`, which keeps the determinant at `+1`.
/// Returns `None` if the decomposition fails.
pub fn closest_rotation(matrix: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = matrix.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = (u * v_t).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    Some(Rotation3::from_matrix_unchecked(u * correction * v_t))
}
