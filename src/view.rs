//! Host map view: conversion between geographic and screen pixel coordinates
//!
//! Overlays never cache pixel positions. Every derivation goes through the
//! view that is current at that moment, so a pan or zoom only requires
//! swapping the view.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::geometry::{LatLng, Point, Size};

/// Tile size of the web mercator pyramid at zoom 0
const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the spherical mercator projection
const MAX_LATITUDE: f64 = 85.051_128_779_8;

/// Mapping between geographic coordinates and view pixels
pub trait MapView {
    /// Pixel position of a coordinate, relative to the view's top-left corner
    fn lat_lng_to_pixel(&self, latlng: LatLng) -> Point;

    /// Inverse of [`MapView::lat_lng_to_pixel`]
    fn pixel_to_lat_lng(&self, point: Point) -> LatLng;

    /// Size of the visible area in pixels
    fn size(&self) -> Size;
}

/// A slippy-map view in the spherical (web) mercator projection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WebMercatorView {
    pub center: LatLng,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
}

impl WebMercatorView {
    pub fn new(center: LatLng, zoom: f64, size: Size) -> Self {
        Self {
            center,
            zoom,
            width: size.width,
            height: size.height,
        }
    }

    fn world_size(&self) -> f64 {
        TILE_SIZE * self.zoom.exp2()
    }

    /// Absolute pixel position in the world map at the current zoom
    fn project(&self, latlng: LatLng) -> Point {
        let scale = self.world_size();
        let lat = latlng.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (latlng.lng + 180.0) / 360.0;
        let y = 0.5 - (PI / 4.0 + lat / 2.0).tan().ln() / (2.0 * PI);
        Point::new(x * scale, y * scale)
    }

    fn unproject(&self, point: Point) -> LatLng {
        let scale = self.world_size();
        let lng = point.x / scale * 360.0 - 180.0;
        let n = PI * (1.0 - 2.0 * point.y / scale);
        let lat = (2.0 * n.exp().atan() - PI / 2.0).to_degrees();
        LatLng::new(lat, lng)
    }

    fn half_size(&self) -> Point {
        Point::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

impl MapView for WebMercatorView {
    fn lat_lng_to_pixel(&self, latlng: LatLng) -> Point {
        self.project(latlng) - self.project(self.center) + self.half_size()
    }

    fn pixel_to_lat_lng(&self, point: Point) -> LatLng {
        self.unproject(point - self.half_size() + self.project(self.center))
    }

    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// A flat view where `lng` is the pixel x and `lat` the pixel y coordinate
///
/// Useful for overlays placed on non-geographic planes (floor plans, game
/// maps) and for headless processing of already projected corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityView {
    pub size: Size,
}

impl IdentityView {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Size::new(width, height),
        }
    }
}

impl MapView for IdentityView {
    fn lat_lng_to_pixel(&self, latlng: LatLng) -> Point {
        Point::new(latlng.lng, latlng.lat)
    }

    fn pixel_to_lat_lng(&self, point: Point) -> LatLng {
        LatLng::new(point.y, point.x)
    }

    fn size(&self) -> Size {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> WebMercatorView {
        WebMercatorView::new(LatLng::new(52.52, 13.405), 15.0, Size::new(800, 600))
    }

    #[test]
    fn test_center_maps_to_middle() {
        let p = view().lat_lng_to_pixel(LatLng::new(52.52, 13.405));
        assert!((p.x - 400.0).abs() < 1e-6);
        assert!((p.y - 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip() {
        let v = view();
        let original = LatLng::new(52.5213, 13.3987);
        let back = v.pixel_to_lat_lng(v.lat_lng_to_pixel(original));
        assert!((back.lat - original.lat).abs() < 1e-9);
        assert!((back.lng - original.lng).abs() < 1e-9);
    }

    #[test]
    fn test_north_is_up() {
        let v = view();
        let north = v.lat_lng_to_pixel(LatLng::new(52.53, 13.405));
        let east = v.lat_lng_to_pixel(LatLng::new(52.52, 13.415));
        assert!(north.y < 300.0);
        assert!(east.x > 400.0);
    }

    #[test]
    fn test_zoom_doubles_distances() {
        let a = LatLng::new(52.52, 13.405);
        let b = LatLng::new(52.521, 13.407);
        let mut v = view();
        let d1 = v.lat_lng_to_pixel(a).distance_to(v.lat_lng_to_pixel(b));
        v.zoom += 1.0;
        let d2 = v.lat_lng_to_pixel(a).distance_to(v.lat_lng_to_pixel(b));
        assert!((d2 / d1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_view() {
        let v = IdentityView::new(100, 100);
        assert_eq!(v.lat_lng_to_pixel(LatLng::new(3.0, 7.0)), Point::new(7.0, 3.0));
        assert_eq!(v.pixel_to_lat_lng(Point::new(7.0, 3.0)), LatLng::new(3.0, 7.0));
    }
}
