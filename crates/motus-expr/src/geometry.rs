//! 3-D geometry over expressions: vectors, points, rotations and quaternions.

use crate::expr::Expr;
use crate::matrix::ExprMatrix;

/// A free vector.
#[derive(Debug, Clone)]
pub struct Vector3 {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
}

/// A point.
#[derive(Debug, Clone)]
pub struct Point3 {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
}

/// A unit quaternion `(x, y, z, w)`.
#[derive(Debug, Clone)]
pub struct Quaternion {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
    pub w: Expr,
}

/// A 3x3 rotation matrix, row-major.
#[derive(Debug, Clone)]
pub struct RotationMatrix {
    m: [[Expr; 3]; 3],
}

impl Vector3 {
    pub fn new(x: impl Into<Expr>, y: impl Into<Expr>, z: impl Into<Expr>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    pub fn components(&self) -> [&Expr; 3] {
        [&self.x, &self.y, &self.z]
    }

    pub fn dot(&self, other: &Self) -> Expr {
        &self.x * &other.x + &self.y * &other.y + &self.z * &other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self {
            x: &self.y * &other.z - &self.z * &other.y,
            y: &self.z * &other.x - &self.x * &other.z,
            z: &self.x * &other.y - &self.y * &other.x,
        }
    }

    pub fn norm(&self) -> Expr {
        self.dot(self).sqrt()
    }

    pub fn scale(&self, factor: &Expr) -> Self {
        Self {
            x: &self.x * factor,
            y: &self.y * factor,
            z: &self.z * factor,
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self {
            x: &self.x - &other.x,
            y: &self.y - &other.y,
            z: &self.z - &other.z,
        }
    }

    /// Normalize; the zero vector stays zero.
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        let inv = Expr::if_greater_zero(&n, &(1.0 / &n), &Expr::zero());
        self.scale(&inv)
    }
}

impl Point3 {
    pub fn new(x: impl Into<Expr>, y: impl Into<Expr>, z: impl Into<Expr>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    pub fn components(&self) -> [&Expr; 3] {
        [&self.x, &self.y, &self.z]
    }

    /// Vector from `other` to `self`.
    pub fn sub(&self, other: &Self) -> Vector3 {
        Vector3 {
            x: &self.x - &other.x,
            y: &self.y - &other.y,
            z: &self.z - &other.z,
        }
    }

    /// Euclidean distance.
    pub fn distance(&self, other: &Self) -> Expr {
        self.sub(other).norm()
    }
}

impl From<&Vector3> for ExprMatrix {
    fn from(v: &Vector3) -> Self {
        Self::column(vec![v.x.clone(), v.y.clone(), v.z.clone()])
    }
}

impl From<&Point3> for ExprMatrix {
    fn from(p: &Point3) -> Self {
        Self::column(vec![p.x.clone(), p.y.clone(), p.z.clone()])
    }
}

impl Quaternion {
    pub fn new(x: impl Into<Expr>, y: impl Into<Expr>, z: impl Into<Expr>, w: impl Into<Expr>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
            w: w.into(),
        }
    }

    pub fn negated(&self) -> Self {
        Self {
            x: -&self.x,
            y: -&self.y,
            z: -&self.z,
            w: -&self.w,
        }
    }

    /// The representative with non-negative scalar part.
    pub fn canonical(&self) -> Self {
        let n = self.negated();
        Self {
            x: Expr::if_greater_zero(&(-&self.w), &n.x, &self.x),
            y: Expr::if_greater_zero(&(-&self.w), &n.y, &self.y),
            z: Expr::if_greater_zero(&(-&self.w), &n.z, &self.z),
            w: Expr::if_greater_zero(&(-&self.w), &n.w, &self.w),
        }
    }

    pub fn vector_part(&self) -> [&Expr; 3] {
        [&self.x, &self.y, &self.z]
    }

    /// Inverse of a unit quaternion.
    pub fn conjugate(&self) -> Self {
        Self {
            x: -&self.x,
            y: -&self.y,
            z: -&self.z,
            w: self.w.clone(),
        }
    }

    /// Hamilton product `self * other`.
    pub fn multiply(&self, other: &Self) -> Self {
        let (x1, y1, z1, w1) = (&self.x, &self.y, &self.z, &self.w);
        let (x2, y2, z2, w2) = (&other.x, &other.y, &other.z, &other.w);
        Self {
            x: w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
            y: w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
            z: w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
            w: w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
        }
    }

    pub fn dot(&self, other: &Self) -> Expr {
        &self.x * &other.x + &self.y * &other.y + &self.z * &other.z + &self.w * &other.w
    }
}

impl RotationMatrix {
    /// From row-major entries.
    pub const fn from_rows(m: [[Expr; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        let o = Expr::one;
        let z = Expr::zero;
        Self::from_rows([[o(), z(), z()], [z(), o(), z()], [z(), z(), o()]])
    }

    /// Rotation by `angle` about a unit `axis` (Rodrigues).
    pub fn from_axis_angle(axis: &Vector3, angle: &Expr) -> Self {
        let (x, y, z) = (&axis.x, &axis.y, &axis.z);
        let c = angle.cos();
        let s = angle.sin();
        let t = 1.0 - &c;
        Self::from_rows([
            [
                &t * x * x + &c,
                &t * x * y - &s * z,
                &t * x * z + &s * y,
            ],
            [
                &t * x * y + &s * z,
                &t * y * y + &c,
                &t * y * z - &s * x,
            ],
            [
                &t * x * z - &s * y,
                &t * y * z + &s * x,
                &t * z * z + &c,
            ],
        ])
    }

    pub fn get(&self, row: usize, col: usize) -> &Expr {
        &self.m[row][col]
    }

    pub fn transpose(&self) -> Self {
        let m = &self.m;
        Self::from_rows([
            [m[0][0].clone(), m[1][0].clone(), m[2][0].clone()],
            [m[0][1].clone(), m[1][1].clone(), m[2][1].clone()],
            [m[0][2].clone(), m[1][2].clone(), m[2][2].clone()],
        ])
    }

    /// Matrix product `self * other`.
    pub fn dot(&self, other: &Self) -> Self {
        let entry = |i: usize, j: usize| -> Expr {
            (0..3).map(|k| &self.m[i][k] * &other.m[k][j]).sum()
        };
        Self::from_rows([
            [entry(0, 0), entry(0, 1), entry(0, 2)],
            [entry(1, 0), entry(1, 1), entry(1, 2)],
            [entry(2, 0), entry(2, 1), entry(2, 2)],
        ])
    }

    /// Rotate a vector.
    pub fn rotate(&self, v: &Vector3) -> Vector3 {
        let row = |i: usize| &self.m[i][0] * &v.x + &self.m[i][1] * &v.y + &self.m[i][2] * &v.z;
        Vector3 {
            x: row(0),
            y: row(1),
            z: row(2),
        }
    }

    /// Convert to a quaternion, branching on the largest diagonal term.
    pub fn to_quaternion(&self) -> Quaternion {
        let m = &self.m;
        let trace = &m[0][0] + &m[1][1] + &m[2][2];

        let s0 = (&trace + 1.0).sqrt() * 2.0;
        let q0 = Quaternion {
            x: (&m[2][1] - &m[1][2]) / &s0,
            y: (&m[0][2] - &m[2][0]) / &s0,
            z: (&m[1][0] - &m[0][1]) / &s0,
            w: &s0 * 0.25,
        };

        let s1 = (1.0 + &m[0][0] - &m[1][1] - &m[2][2]).sqrt() * 2.0;
        let q1 = Quaternion {
            x: &s1 * 0.25,
            y: (&m[0][1] + &m[1][0]) / &s1,
            z: (&m[0][2] + &m[2][0]) / &s1,
            w: (&m[2][1] - &m[1][2]) / &s1,
        };

        let s2 = (1.0 + &m[1][1] - &m[0][0] - &m[2][2]).sqrt() * 2.0;
        let q2 = Quaternion {
            x: (&m[0][1] + &m[1][0]) / &s2,
            y: &s2 * 0.25,
            z: (&m[1][2] + &m[2][1]) / &s2,
            w: (&m[0][2] - &m[2][0]) / &s2,
        };

        let s3 = (1.0 + &m[2][2] - &m[0][0] - &m[1][1]).sqrt() * 2.0;
        let q3 = Quaternion {
            x: (&m[0][2] + &m[2][0]) / &s3,
            y: (&m[1][2] + &m[2][1]) / &s3,
            z: &s3 * 0.25,
            w: (&m[1][0] - &m[0][1]) / &s3,
        };

        let x_largest = (&m[0][0] - &m[1][1]).min(&(&m[0][0] - &m[2][2]));
        let y_largest = &m[1][1] - &m[2][2];
        let pick = |a: &Expr, b: &Expr, c: &Expr, d: &Expr| {
            Expr::if_greater_zero(
                &trace,
                a,
                &Expr::if_greater_zero(&x_largest, b, &Expr::if_greater_zero(&y_largest, c, d)),
            )
        };
        Quaternion {
            x: pick(&q0.x, &q1.x, &q2.x, &q3.x),
            y: pick(&q0.y, &q1.y, &q2.y, &q3.y),
            z: pick(&q0.z, &q1.z, &q2.z, &q3.z),
            w: pick(&q0.w, &q1.w, &q2.w, &q3.w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(e: &Expr) -> f64 {
        e.as_const().unwrap()
    }

    #[test]
    fn cross_product_of_axes() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 1.0, 0.0);
        let z = x.cross(&y);
        assert_relative_eq!(c(&z.z), 1.0);
        assert_relative_eq!(c(&z.x), 0.0);
    }

    #[test]
    fn quaternion_times_conjugate_is_identity() {
        let axis = Vector3::new(0.0, 1.0, 0.0);
        let q = RotationMatrix::from_axis_angle(&axis, &Expr::constant(0.7)).to_quaternion();
        let e = q.multiply(&q.conjugate());
        assert_relative_eq!(c(&e.w), 1.0, epsilon = 1e-12);
        assert_relative_eq!(c(&e.y), 0.0, epsilon = 1e-12);
        assert_relative_eq!(c(&q.dot(&q)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn identity_quaternion() {
        let q = RotationMatrix::identity().to_quaternion();
        assert_relative_eq!(c(&q.w), 1.0);
        assert_relative_eq!(c(&q.x), 0.0);
    }

    #[test]
    fn quarter_turn_about_z() {
        let axis = Vector3::new(0.0, 0.0, 1.0);
        let r = RotationMatrix::from_axis_angle(&axis, &Expr::constant(std::f64::consts::FRAC_PI_2));
        let q = r.to_quaternion();
        let half = std::f64::consts::FRAC_PI_4;
        assert_relative_eq!(c(&q.z), half.sin(), epsilon = 1e-12);
        assert_relative_eq!(c(&q.w), half.cos(), epsilon = 1e-12);
    }

    #[test]
    fn half_turn_uses_non_trace_branch() {
        let axis = Vector3::new(1.0, 0.0, 0.0);
        let r = RotationMatrix::from_axis_angle(&axis, &Expr::constant(std::f64::consts::PI));
        let q = r.to_quaternion();
        assert_relative_eq!(c(&q.x).abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(c(&q.w), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn canonical_flips_negative_scalar() {
        let q = Quaternion::new(0.0, 0.0, 0.6, -0.8).canonical();
        assert_relative_eq!(c(&q.w), 0.8);
        assert_relative_eq!(c(&q.z), -0.6);
    }

    #[test]
    fn transpose_inverts_rotation() {
        let axis = Vector3::new(0.0, 1.0, 0.0);
        let r = RotationMatrix::from_axis_angle(&axis, &Expr::constant(0.7));
        let i = r.dot(&r.transpose());
        for row in 0..3 {
            for col in 0..3 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert_relative_eq!(c(i.get(row, col)), expected, epsilon = 1e-12);
            }
        }
    }
}
