//! Projective transformation from four point correspondences
//!
//! This module derives the 3x3 homography that maps four source points onto
//! four target points. The derivation is closed form: each set of four points
//! defines a projective basis (the matrix sending the canonical basis and
//! `(1, 1, 1)` onto the points), and the transform is the target basis
//! composed with the adjugate of the source basis.

use crate::error::{OverlayError, OverlayResult};
use crate::geometry::Point;
use crate::matrix::Matrix3;

/// Relative tolerance for the triangle areas spanned by the four points
const COLLINEAR_EPSILON: f64 = 1e-10;

/// A mapping of one point to its new location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMapping {
    pub from: Point,
    pub to: Point,
}

impl PointMapping {
    pub fn new(from: Point, to: Point) -> Self {
        Self { from, to }
    }

    /// Create a mapping from raw coordinates
    pub fn map(from_x: f64, from_y: f64, to_x: f64, to_y: f64) -> Self {
        Self::new(Point::new(from_x, from_y), Point::new(to_x, to_y))
    }
}

/// Build a projective basis from four points
///
/// The columns of `B` are the first three points in homogeneous form. The
/// fourth point expressed in that basis (up to the factor `1/det(B)`) gives
/// the column weights, so the returned matrix maps `(1,0,0)`, `(0,1,0)`,
/// `(0,0,1)` and `(1,1,1)` onto the four points.
fn base_from_points(p1: Point, p2: Point, p3: Point, p4: Point) -> OverlayResult<Matrix3> {
    let b = Matrix3::from_columns([p1.x, p1.y, 1.0], [p2.x, p2.y, 1.0], [p3.x, p3.y, 1.0]);
    let v = b.adjugate().multiply_vector([p4.x, p4.y, 1.0]);

    // det(B) and the entries of v are twice the signed areas of the four
    // triangles the points form; any vanishing one means a collinear triple
    let tolerance = COLLINEAR_EPSILON * squared_extent(&[p1, p2, p3, p4]);
    let det = b.determinant();
    if !(det.abs() > tolerance) || v.iter().any(|c| !(c.abs() > tolerance)) {
        return Err(OverlayError::SingularTransform);
    }

    Ok(b.multiply_diagonal(v))
}

/// Squared diagonal of the bounding box of the points
fn squared_extent(points: &[Point]) -> f64 {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let (dx, dy) = (max_x - min_x, max_y - min_y);
    dx * dx + dy * dy
}

/// Create a transformation projecting four points to their new locations
///
/// The result is normalized so that its bottom-right entry is 1. Fails with
/// [`OverlayError::SingularTransform`] when three points of either set are
/// collinear or the solution is not finite.
pub fn project_2d(
    p1: PointMapping,
    p2: PointMapping,
    p3: PointMapping,
    p4: PointMapping,
) -> OverlayResult<Matrix3> {
    let from = base_from_points(p1.from, p2.from, p3.from, p4.from)?;
    let to = base_from_points(p1.to, p2.to, p3.to, p4.to)?;

    // Into the "from" basis, then out of the "to" basis
    let matrix = to.multiply(&from.adjugate()).normalize(2, 2);
    if !matrix.is_finite() {
        return Err(OverlayError::SingularTransform);
    }
    Ok(matrix)
}

/// Solve for the transform taking the unit square onto a quadrilateral
///
/// `quad` is ordered top-left, top-right, bottom-right, bottom-left; the
/// unit-square corners are paired with it in that same winding.
pub fn unit_square_to_quad(quad: [Point; 4]) -> OverlayResult<Matrix3> {
    project_2d(
        PointMapping::map(0.0, 0.0, quad[0].x, quad[0].y),
        PointMapping::map(1.0, 0.0, quad[1].x, quad[1].y),
        PointMapping::map(0.0, 1.0, quad[3].x, quad[3].y),
        PointMapping::map(1.0, 1.0, quad[2].x, quad[2].y),
    )
}
