use mvg_core::nalgebra::{Matrix2, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Maximum number of fixed-point iterations of the approximate inversion.
const APPROXIMATE_MAX_ITERATIONS: usize = 50;
/// Squared step under which the fixed-point inversion stops.
const APPROXIMATE_TOLERANCE: f64 = 1e-50;
/// Maximum number of Newton iterations of the exact inversion.
const EXACT_MAX_ITERATIONS: usize = 100;

/// Lens distortion following the [Brown-Conrady][b71] model with three radial and two
/// decentering coefficients, stored in the usual `[k1, k2, p1, p2, k3]` order.
///
/// Given undistorted coordinates $(x,y)$ on the unit focal plane and $r^2 = x^2 + y^2$:
///
/// $$
/// \begin{aligned}
/// x_d &= x ⋅ (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + 2 p_1 x y + p_2 (r^2 + 2 x^2) \\\\
/// y_d &= y ⋅ (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + p_1 (r^2 + 2 y^2) + 2 p_2 x y
/// \end{aligned}
/// $$
///
/// [b71]: https://www.asprs.org/wp-content/uploads/pers/1971journal/aug/1971_aug_855-866.pdf
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct BrownDistortion {
    pub coefficients: [f64; 5],
}

impl BrownDistortion {
    /// No distortion at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates the distortion from `[k1, k2, p1, p2, k3]`.
    pub fn from_coefficients(coefficients: [f64; 5]) -> Self {
        Self { coefficients }
    }

    pub fn is_identity(&self) -> bool {
        self.coefficients.iter().all(|&k| k == 0.0)
    }

    /// Radial factor and its derivative with respect to $r^2$.
    fn radial(&self, r2: f64) -> (f64, f64) {
        let [k1, k2, _, _, k3] = self.coefficients;
        let factor = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
        let derivative = k1 + r2 * (2.0 * k2 + r2 * 3.0 * k3);
        (factor, derivative)
    }

    fn decentering(&self, point: Vector2<f64>) -> Vector2<f64> {
        let [_, _, p1, p2, _] = self.coefficients;
        let (x, y) = (point.x, point.y);
        let r2 = point.norm_squared();
        Vector2::new(
            2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Distorts a point of the unit focal plane.
    pub fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        let (factor, _) = self.radial(point.norm_squared());
        point * factor + self.decentering(point)
    }

    /// Jacobian of [`BrownDistortion::distort`] with respect to the undistorted point.
    pub fn jacobian(&self, point: Vector2<f64>) -> Matrix2<f64> {
        let [_, _, p1, p2, _] = self.coefficients;
        let (x, y) = (point.x, point.y);
        let (factor, derivative) = self.radial(point.norm_squared());
        let cross = 2.0 * x * y * derivative + 2.0 * p1 * x + 2.0 * p2 * y;
        Matrix2::new(
            factor + 2.0 * x * x * derivative + 2.0 * p1 * y + 6.0 * p2 * x,
            cross,
            cross,
            factor + 2.0 * y * y * derivative + 6.0 * p1 * y + 2.0 * p2 * x,
        )
    }

    /// Inverts the distortion by fixed-point iteration.
    ///
    /// This is cheap and accurate for mild distortions, but it is not guaranteed to reach
    /// machine precision.
    pub fn undistort_approximate(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return distorted;
        }
        let mut point = distorted;
        for _ in 0..APPROXIMATE_MAX_ITERATIONS {
            let (factor, _) = self.radial(point.norm_squared());
            let next = (distorted - self.decentering(point)) / factor;
            let step = (next - point).norm_squared();
            point = next;
            if !(step > APPROXIMATE_TOLERANCE) {
                break;
            }
        }
        point
    }

    /// Inverts the distortion with Newton's method, starting from the approximate inversion.
    ///
    /// Falls back to the approximate result when the Jacobian becomes singular or the
    /// iteration diverges.
    pub fn undistort_exact(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        let approximate = self.undistort_approximate(distorted);
        if self.is_identity() {
            return approximate;
        }
        let mut point = approximate;
        for _ in 0..EXACT_MAX_ITERATIONS {
            let residual = self.distort(point) - distorted;
            let delta = match self.jacobian(point).try_inverse() {
                Some(inverse) => inverse * residual,
                None => return approximate,
            };
            point -= delta;
            if !point.iter().all(|n| n.is_finite()) {
                return approximate;
            }
            if delta.norm() <= f64::EPSILON * point.norm().max(1.0) {
                break;
            }
        }
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use float_eq::assert_float_eq;
    use proptest::prelude::*;

    fn distortion() -> BrownDistortion {
        BrownDistortion::from_coefficients([-0.28, 0.07, 0.0012, -0.0004, 0.0])
    }

    #[test]
    fn identity_leaves_points() {
        let point = Vector2::new(0.3, -0.2);
        assert_eq!(BrownDistortion::none().distort(point), point);
        assert_eq!(BrownDistortion::none().undistort_exact(point), point);
    }

    #[test]
    fn finite_difference_jacobian() {
        let h = f64::EPSILON.powf(1.0 / 3.0);
        let distortion = distortion();
        proptest!(|(x in -0.6..0.6, y in -0.6..0.6)| {
            let point = Vector2::new(x, y);
            let jacobian = distortion.jacobian(point);
            for axis in 0..2 {
                let mut step = Vector2::zeros();
                step[axis] = h;
                let approx = (distortion.distort(point + step) - distortion.distort(point - step)) / (2.0 * h);
                assert_float_eq!(jacobian[(0, axis)], approx.x, abs <= 1e-8);
                assert_float_eq!(jacobian[(1, axis)], approx.y, abs <= 1e-8);
            }
        });
    }

    #[test]
    fn exact_round_trip() {
        let distortion = distortion();
        proptest!(|(x in -0.6..0.6, y in -0.6..0.6)| {
            let point = Vector2::new(x, y);
            let back = distortion.undistort_exact(distortion.distort(point));
            assert_float_eq!(back.x, point.x, abs <= 1e-12);
            assert_float_eq!(back.y, point.y, abs <= 1e-12);
        });
    }

    #[test]
    fn approximate_is_close_for_mild_distortion() {
        let distortion = BrownDistortion::from_coefficients([-0.05, 0.001, 0.0, 0.0, 0.0]);
        let point = Vector2::new(0.2, 0.15);
        let back = distortion.undistort_approximate(distortion.distort(point));
        assert_relative_eq!(back, point, epsilon = 1e-9);
    }
}
