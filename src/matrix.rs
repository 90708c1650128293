//! Small fixed-size matrices for 2D projective transformations
//!
//! Values are stored column-major (index `col * n + row`), the layout CSS
//! `matrix3d` and GPU uniforms expect. Every operation returns a new value
//! and leaves its operands untouched.

use std::fmt;

use crate::geometry::Point;

pub type Vector3 = [f64; 3];
pub type Vector4 = [f64; 4];

/// A 3x3 matrix in homogeneous 2D coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    values: [f64; 9],
}

impl Matrix3 {
    /// Create a matrix from column-major values
    pub const fn new(values: [f64; 9]) -> Self {
        Self { values }
    }

    pub const fn identity() -> Self {
        Self::new([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Create a matrix whose columns are the given vectors
    pub fn from_columns(c0: Vector3, c1: Vector3, c2: Vector3) -> Self {
        Self::new([c0[0], c0[1], c0[2], c1[0], c1[1], c1[2], c2[0], c2[1], c2[2]])
    }

    /// Column-major values
    pub fn values(&self) -> &[f64; 9] {
        &self.values
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[3 * col + row]
    }

    /// Transposed cofactor matrix
    ///
    /// Equal to `det(A) * A^-1`, so it can replace the inverse wherever the
    /// overall scalar factor does not matter. For a singular matrix every
    /// entry is a 2x2 minor of a rank-deficient matrix, so there is no
    /// division and no failure here.
    pub fn adjugate(&self) -> Matrix3 {
        let a = &self.values;
        let (a00, a01, a02) = (a[0], a[1], a[2]);
        let (a10, a11, a12) = (a[3], a[4], a[5]);
        let (a20, a21, a22) = (a[6], a[7], a[8]);

        Matrix3::new([
            a11 * a22 - a12 * a21,
            a02 * a21 - a01 * a22,
            a01 * a12 - a02 * a11,
            a12 * a20 - a10 * a22,
            a00 * a22 - a02 * a20,
            a02 * a10 - a00 * a12,
            a10 * a21 - a11 * a20,
            a01 * a20 - a00 * a21,
            a00 * a11 - a01 * a10,
        ])
    }

    pub fn determinant(&self) -> f64 {
        let a = &self.values;
        a[0] * (a[4] * a[8] - a[5] * a[7]) + a[1] * (a[5] * a[6] - a[3] * a[8])
            + a[2] * (a[3] * a[7] - a[4] * a[6])
    }

    /// Matrix product `self * b`
    pub fn multiply(&self, b: &Matrix3) -> Matrix3 {
        let a = &self.values;
        let b = &b.values;
        let mut out = [0.0; 9];
        for col in 0..3 {
            for row in 0..3 {
                out[3 * col + row] =
                    a[row] * b[3 * col] + a[3 + row] * b[3 * col + 1] + a[6 + row] * b[3 * col + 2];
            }
        }
        Matrix3::new(out)
    }

    /// Product `self * v` with a column vector
    #[inline]
    pub fn multiply_vector(&self, v: Vector3) -> Vector3 {
        let a = &self.values;
        [
            a[0] * v[0] + a[3] * v[1] + a[6] * v[2],
            a[1] * v[0] + a[4] * v[1] + a[7] * v[2],
            a[2] * v[0] + a[5] * v[1] + a[8] * v[2],
        ]
    }

    /// Apply the transform to a cartesian point, dividing by the homogeneous
    /// component. `None` when the point maps to infinity.
    #[inline]
    pub fn transform_point(&self, p: Point) -> Option<Point> {
        let [x, y, w] = self.multiply_vector([p.x, p.y, 1.0]);
        if w == 0.0 || !w.is_finite() {
            return None;
        }
        Some(Point::new(x / w, y / w))
    }

    pub fn multiply_scalar(&self, s: f64) -> Matrix3 {
        Matrix3::new(self.values.map(|v| v * s))
    }

    /// Scale so that the entry at (`row`, `col`) becomes exactly 1
    ///
    /// A zero entry yields infinite or NaN values; check with [`is_finite`].
    ///
    /// [`is_finite`]: Matrix3::is_finite
    pub fn normalize(&self, row: usize, col: usize) -> Matrix3 {
        self.multiply_scalar(1.0 / self.get(row, col))
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Shortcut for `self * diag(v)`
    pub fn multiply_diagonal(&self, v: Vector3) -> Matrix3 {
        let a = &self.values;
        Matrix3::new([
            v[0] * a[0],
            v[0] * a[1],
            v[0] * a[2],
            v[1] * a[3],
            v[1] * a[4],
            v[1] * a[5],
            v[2] * a[6],
            v[2] * a[7],
            v[2] * a[8],
        ])
    }

    /// Scale the input before applying this transform: `self * diag(sx, sy, 1)`
    pub fn scale_before(&self, sx: f64, sy: f64) -> Matrix3 {
        self.multiply_diagonal([sx, sy, 1.0])
    }

    /// Scale the output after applying this transform: `diag(sx, sy, 1) * self`
    pub fn scale_after(&self, sx: f64, sy: f64) -> Matrix3 {
        let a = &self.values;
        Matrix3::new([
            sx * a[0],
            sy * a[1],
            a[2],
            sx * a[3],
            sy * a[4],
            a[5],
            sx * a[6],
            sy * a[7],
            a[8],
        ])
    }

    /// Translate the input before applying this transform: `self * T(tx, ty)`
    pub fn translate_before(&self, tx: f64, ty: f64) -> Matrix3 {
        let a = &self.values;
        Matrix3::new([
            a[0],
            a[1],
            a[2],
            a[3],
            a[4],
            a[5],
            tx * a[0] + ty * a[3] + a[6],
            tx * a[1] + ty * a[4] + a[7],
            tx * a[2] + ty * a[5] + a[8],
        ])
    }

    /// Translate the output after applying this transform: `T(tx, ty) * self`
    pub fn translate_after(&self, tx: f64, ty: f64) -> Matrix3 {
        let a = &self.values;
        Matrix3::new([
            a[0] + a[2] * tx,
            a[1] + a[2] * ty,
            a[2],
            a[3] + a[5] * tx,
            a[4] + a[5] * ty,
            a[5],
            a[6] + a[8] * tx,
            a[7] + a[8] * ty,
            a[8],
        ])
    }

    /// Lift into a 3D homogeneous transform with the identity on the z axis
    pub fn to_matrix_3d(&self) -> Matrix4 {
        let m = &self.values;
        Matrix4::new([
            m[0], m[1], 0.0, m[2], //
            m[3], m[4], 0.0, m[5], //
            0.0, 0.0, 1.0, 0.0, //
            m[6], m[7], 0.0, m[8],
        ])
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// A 4x4 matrix in homogeneous 3D coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    values: [f64; 16],
}

impl Matrix4 {
    pub const fn new(values: [f64; 16]) -> Self {
        Self { values }
    }

    pub fn diagonal(v: Vector4) -> Self {
        let mut values = [0.0; 16];
        for (i, d) in v.into_iter().enumerate() {
            values[5 * i] = d;
        }
        Self::new(values)
    }

    pub fn identity() -> Self {
        Self::diagonal([1.0; 4])
    }

    pub fn values(&self) -> &[f64; 16] {
        &self.values
    }

    /// Matrix product `self * b`
    pub fn multiply(&self, b: &Matrix4) -> Matrix4 {
        let a = &self.values;
        let b = &b.values;
        let mut out = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[4 * col + row] = (0..4).map(|k| a[4 * k + row] * b[4 * col + k]).sum();
            }
        }
        Matrix4::new(out)
    }

    /// Add a translation to the last column
    pub fn add_translation(&self, tx: f64, ty: f64, tz: f64) -> Matrix4 {
        let mut values = self.values;
        values[12] += tx;
        values[13] += ty;
        values[14] += tz;
        Matrix4::new(values)
    }

    pub fn multiply_vector(&self, v: Vector4) -> Vector4 {
        let a = &self.values;
        let mut out = [0.0; 4];
        for (row, o) in out.iter_mut().enumerate() {
            *o = (0..4).map(|k| a[4 * k + row] * v[k]).sum();
        }
        out
    }
}

/// Comma-separated column-major values, as taken by CSS `matrix3d()`
impl fmt::Display for Matrix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix3 {
        Matrix3::new([2.0, 1.0, 0.5, -1.0, 3.0, 0.25, 4.0, -2.0, 1.0])
    }

    fn to_nalgebra(m: &Matrix3) -> nalgebra::Matrix3<f64> {
        nalgebra::Matrix3::from_column_slice(m.values())
    }

    fn assert_close(a: &Matrix3, b: &Matrix3, eps: f64) {
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < eps, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_multiply_matches_nalgebra() {
        let a = sample();
        let b = Matrix3::new([1.0, 0.0, 2.0, 3.0, 1.0, -1.0, 0.5, 0.5, 1.0]);
        let expected = to_nalgebra(&a) * to_nalgebra(&b);
        let product = a.multiply(&b);
        for (x, y) in product.values().iter().zip(expected.as_slice()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_adjugate_is_scaled_inverse() {
        let m = sample();
        let det = m.determinant();
        let inverse = to_nalgebra(&m).try_inverse().unwrap();
        let adj = m.adjugate();
        for (x, y) in adj.values().iter().zip(inverse.as_slice()) {
            assert!((x - det * y).abs() < 1e-9);
        }
        assert!((det - to_nalgebra(&m).determinant()).abs() < 1e-12);
    }

    #[test]
    fn test_adjugate_of_singular_is_finite() {
        // Third column is the sum of the first two
        let m = Matrix3::from_columns([1.0, 2.0, 1.0], [3.0, 4.0, 1.0], [4.0, 6.0, 2.0]);
        assert_eq!(m.determinant(), 0.0);
        let adj = m.adjugate();
        assert!(adj.is_finite());
        let zero = m.multiply(&adj);
        assert!(zero.values().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_multiply_vector() {
        let m = sample();
        let v = m.multiply_vector([1.0, 2.0, 3.0]);
        let expected = to_nalgebra(&m) * nalgebra::Vector3::new(1.0, 2.0, 3.0);
        for i in 0..3 {
            assert!((v[i] - expected[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normalize() {
        let m = sample().normalize(2, 2);
        assert_eq!(m.get(2, 2), 1.0);
        assert!(!Matrix3::new([1.0; 9]).multiply_scalar(0.0).normalize(2, 2).is_finite());
    }

    #[test]
    fn test_shortcuts_match_full_products() {
        let m = sample();
        let diag = Matrix3::from_columns([2.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 1.0]);
        let translation = Matrix3::from_columns([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [5.0, -7.0, 1.0]);

        assert_close(&m.scale_before(2.0, 3.0), &m.multiply(&diag), 1e-12);
        assert_close(&m.scale_after(2.0, 3.0), &diag.multiply(&m), 1e-12);
        assert_close(&m.translate_before(5.0, -7.0), &m.multiply(&translation), 1e-12);
        assert_close(&m.translate_after(5.0, -7.0), &translation.multiply(&m), 1e-12);
    }

    #[test]
    fn test_operands_unchanged() {
        let m = sample();
        let copy = m;
        let _ = m.adjugate().multiply(&m).scale_before(2.0, 2.0).translate_after(1.0, 1.0);
        assert_eq!(m, copy);
    }

    #[test]
    fn test_lift_to_3d() {
        let m = Matrix3::identity().translate_after(10.0, 20.0);
        let lifted = m.to_matrix_3d();
        let p = lifted.multiply_vector([1.0, 2.0, 5.0, 1.0]);
        assert_eq!(p, [11.0, 22.0, 5.0, 1.0]);
    }

    #[test]
    fn test_matrix4_translation_and_display() {
        let m = Matrix4::diagonal([2.0, 2.0, 1.0, 1.0]).add_translation(1.0, -1.0, 0.0);
        assert_eq!(m.multiply_vector([1.0, 1.0, 0.0, 1.0]), [3.0, 1.0, 0.0, 1.0]);
        assert_eq!(Matrix4::identity().multiply(&m), m);
        assert_eq!(
            Matrix4::identity().to_string(),
            "1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1"
        );
    }
}
