use nalgebra::{Point3, Unit, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A 3d line through `origin` along a unit `direction`.
///
/// The back-projection of an image observation is such a line, starting at the optical center.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Line3 {
    pub origin: Point3<f64>,
    pub direction: Unit<Vector3<f64>>,
}

impl Line3 {
    /// Returns `None` if `direction` cannot be normalized.
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Option<Self> {
        Unit::try_new(direction, f64::EPSILON).map(|direction| Self { origin, direction })
    }

    /// The vector from the closest point of the line to `point`, orthogonal to the line.
    pub fn offset(&self, point: &Point3<f64>) -> Vector3<f64> {
        let delta = point - self.origin;
        delta - self.direction.into_inner() * delta.dot(&self.direction)
    }

    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        self.offset(point).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn distance_to_axis() {
        let line = Line3::new(Point3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 3.0)).unwrap();
        assert_relative_eq!(line.distance(&Point3::new(3.0, 4.0, -7.0)), 5.0);
        assert_relative_eq!(line.distance(&Point3::new(0.0, 0.0, 42.0)), 0.0);
    }

    #[test]
    fn zero_direction_is_not_a_line() {
        assert!(Line3::new(Point3::origin(), Vector3::zeros()).is_none());
    }
}
