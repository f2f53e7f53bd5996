//! Linear algebra aliases and small numeric helpers shared by every constraint.

pub use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// World-space orientation of a bone.
pub type Quaternion = UnitQuaternion<f64>;

/// Separations at or below this are treated as coincident points.
pub const EPSILON: f64 = 1e-7;

/// `max(0, value)`.
#[inline]
pub fn clamp_non_negative(value: f64) -> f64 {
    value.max(0.0)
}

/// Pack a 1x3 Jacobian into the shared 3x3 container. Rows 2 and 3 stay zero.
#[inline]
pub fn jacobian_row(row: &Vector3<f64>) -> Matrix3<f64> {
    let mut m = Matrix3::zeros();
    m.set_row(0, &row.transpose());
    m
}

/// Invert the largest non-singular leading block of `m`.
///
/// Tries the full 3x3, then the upper-left 2x2, then M11 alone. Whatever is
/// not covered by the inverted block is left zero, so lower-DOF constraints
/// packed into a 3x3 still get a usable effective mass.
pub fn adaptive_invert(m: &Matrix3<f64>) -> Matrix3<f64> {
    if let Some(inv) = m.try_inverse() {
        return inv;
    }

    let mut result = Matrix3::zeros();
    let det2 = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    if det2.abs() > f64::EPSILON {
        let inv_det = 1.0 / det2;
        result[(0, 0)] = m[(1, 1)] * inv_det;
        result[(0, 1)] = -m[(0, 1)] * inv_det;
        result[(1, 0)] = -m[(1, 0)] * inv_det;
        result[(1, 1)] = m[(0, 0)] * inv_det;
        return result;
    }

    if m[(0, 0)].abs() > f64::EPSILON {
        result[(0, 0)] = 1.0 / m[(0, 0)];
    }
    result
}
