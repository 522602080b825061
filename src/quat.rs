//! Minimal quaternion arithmetic for packet parsing.
//!
//! Convention: `(w, x, y, z)` with `w` as the scalar part; rotations compose
//! by right-multiplication, `q_total = q_prev * q_delta`. This is only what
//! the packed-sample reconstruction and the 9D heading composition need; it
//! is not a general orientation-math library.

/// A unit quaternion in `(w, x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Identity rotation.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Euclidean norm of the four components.
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Return the quaternion scaled to unit length.
    ///
    /// Degenerate inputs (norm ≈ 0) return the identity instead of dividing
    /// by zero.
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        if n < 1e-12 {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product `self * other`.
    pub fn multiply(&self, other: &Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        )
    }

    /// Incremental rotation for one angular-velocity sample.
    ///
    /// `gyr` is in rad/s, `rate` in Hz; the rotation angle is `|gyr| / rate`.
    /// Uses the half-angle axis-angle form with a small-angle series for
    /// `sin(θ/2)/θ` so near-zero rates stay numerically exact.
    pub fn from_gyr(gyr: [f64; 3], rate: f64) -> Quaternion {
        let omega = (gyr[0] * gyr[0] + gyr[1] * gyr[1] + gyr[2] * gyr[2]).sqrt();
        let angle = omega / rate;
        let half = angle / 2.0;

        // k = sin(angle/2) / omega, expanded around omega = 0.
        let k = if omega < 1e-9 {
            (1.0 - half * half / 6.0) / (2.0 * rate)
        } else {
            half.sin() / omega
        };

        Quaternion::new(half.cos(), k * gyr[0], k * gyr[1], k * gyr[2])
    }

    /// Compose a heading (yaw) offset onto an orientation:
    /// `q_9d = R_z(delta) * q`.
    pub fn add_heading(&self, delta: f64) -> Quaternion {
        let heading = Quaternion::new((delta / 2.0).cos(), 0.0, 0.0, (delta / 2.0).sin());
        heading.multiply(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_close(a: &Quaternion, b: &Quaternion, tol: f64) {
        assert!((a.w - b.w).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.x - b.x).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.y - b.y).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.z - b.z).abs() < tol, "{a:?} vs {b:?}");
    }

    #[test]
    fn identity_is_neutral() {
        let q = Quaternion::new(0.5, 0.5, 0.5, 0.5);
        assert_close(&q.multiply(&Quaternion::identity()), &q, 1e-15);
        assert_close(&Quaternion::identity().multiply(&q), &q, 1e-15);
    }

    #[test]
    fn multiply_composes_z_rotations() {
        // Two 90° rotations about z compose to 180°.
        let quarter = Quaternion::new((PI / 4.0).cos(), 0.0, 0.0, (PI / 4.0).sin());
        let half = quarter.multiply(&quarter);
        assert_close(&half, &Quaternion::new(0.0, 0.0, 0.0, 1.0), 1e-12);
    }

    #[test]
    fn from_gyr_zero_rate_is_identity() {
        let q = Quaternion::from_gyr([0.0, 0.0, 0.0], 200.0);
        assert_close(&q, &Quaternion::identity(), 1e-15);
    }

    #[test]
    fn from_gyr_matches_axis_angle() {
        // 1 rad/s about x at 200 Hz → 5 mrad rotation about x.
        let q = Quaternion::from_gyr([1.0, 0.0, 0.0], 200.0);
        let half: f64 = 0.005 / 2.0;
        assert_close(
            &q,
            &Quaternion::new(half.cos(), half.sin(), 0.0, 0.0),
            1e-12,
        );
        assert!((q.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn from_gyr_tiny_rate_stays_unit() {
        let q = Quaternion::from_gyr([1e-12, 0.0, 0.0], 200.0);
        assert!((q.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn add_heading_rotates_about_global_z() {
        let q = Quaternion::identity().add_heading(PI / 2.0);
        assert_close(
            &q,
            &Quaternion::new((PI / 4.0).cos(), 0.0, 0.0, (PI / 4.0).sin()),
            1e-12,
        );
    }

    #[test]
    fn normalized_handles_degenerate_input() {
        let q = Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized();
        assert_close(&q, &Quaternion::identity(), 1e-15);
        let q = Quaternion::new(2.0, 0.0, 0.0, 0.0).normalized();
        assert!((q.norm() - 1.0).abs() < 1e-15);
    }
}
