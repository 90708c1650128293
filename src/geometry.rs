//! Plain 2D value types shared by the overlay engine
//!
//! `Point` is used for every planar space (layer pixels, unit square, image
//! pixels); `LatLng` only for geographic positions handed to and from the
//! host map view.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// A 2D point or vector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: Point) -> f64 {
        (other - *self).length()
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Midpoint between this point and another
    pub fn midpoint(&self, other: Point) -> Point {
        *self + (other - *self) / 2.0
    }

    /// Unit vector pointing from this point to `other`
    pub fn direction_to(&self, other: Point) -> Point {
        let dir = other - *self;
        dir / dir.length()
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Point;

    fn div(self, rhs: f64) -> Point {
        Point::new(self.x / rhs, self.y / rhs)
    }
}

/// A geographic coordinate in degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True for the `(0, 0)` placeholder used by unplaced overlays
    pub fn is_zero(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }
}

/// Axis-aligned geographic bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl GeoBounds {
    /// Smallest bounds containing every given coordinate
    pub fn from_coords(coords: &[LatLng]) -> Self {
        let mut south_west = LatLng::new(f64::INFINITY, f64::INFINITY);
        let mut north_east = LatLng::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in coords {
            south_west.lat = south_west.lat.min(c.lat);
            south_west.lng = south_west.lng.min(c.lng);
            north_east.lat = north_east.lat.max(c.lat);
            north_east.lng = north_east.lng.max(c.lng);
        }
        Self { south_west, north_east }
    }

    pub fn west(&self) -> f64 {
        self.south_west.lng
    }

    pub fn south(&self) -> f64 {
        self.south_west.lat
    }

    pub fn east(&self) -> f64 {
        self.north_east.lng
    }

    pub fn north(&self) -> f64 {
        self.north_east.lat
    }
}

/// Axis-aligned bounds in a planar pixel space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PixelBounds {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl PixelBounds {
    pub fn from_points(points: &[Point]) -> Self {
        let mut bounds = Self {
            left: f64::INFINITY,
            top: f64::INFINITY,
            right: f64::NEG_INFINITY,
            bottom: f64::NEG_INFINITY,
        };
        for p in points {
            bounds.left = bounds.left.min(p.x);
            bounds.top = bounds.top.min(p.y);
            bounds.right = bounds.right.max(p.x);
            bounds.bottom = bounds.bottom.max(p.y);
        }
        bounds
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Position of `p` relative to these bounds, scaled into the unit square
    pub fn to_unit(&self, p: Point) -> Point {
        Point::new((p.x - self.left) / self.width(), (p.y - self.top) / self.height())
    }
}

/// Pixel dimensions of an image or view
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
