//! Overlay state: the four geographic corners of an image and the display
//! transform derived from them
//!
//! The corners are only reachable through accessor methods. Every change
//! first derives the transform for the candidate corners and commits both
//! together, so a rejected configuration leaves the previous placement intact.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{OverlayError, OverlayResult};
use crate::geometry::{GeoBounds, LatLng, Point, Size};
use crate::matrix::Matrix4;
use crate::transform::unit_square_to_quad;
use crate::view::MapView;

/// Padding (per side, in pixels) kept free when fitting a new image into the view
const FIT_PADDING: f64 = 100.0;

/// Geographic corners, ordered top-left, top-right, bottom-right, bottom-left
pub type Corners = [LatLng; 4];

/// One corner of the overlay quadrilateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft = 0,
    TopRight = 1,
    BottomRight = 2,
    BottomLeft = 3,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Corner::TopLeft => "Top Left",
            Corner::TopRight => "Top Right",
            Corner::BottomRight => "Bottom Right",
            Corner::BottomLeft => "Bottom Left",
        }
    }

    /// The two corners sharing an edge with this one
    pub fn adjacent(self) -> (Corner, Corner) {
        let i = self.index();
        (Corner::ALL[(i + 3) % 4], Corner::ALL[(i + 1) % 4])
    }
}

impl TryFrom<usize> for Corner {
    type Error = OverlayError;

    fn try_from(index: usize) -> OverlayResult<Self> {
        Corner::ALL
            .get(index)
            .copied()
            .ok_or(OverlayError::InvalidCorner(index))
    }
}

/// The decoded source raster and its original file name
pub struct SourceImage {
    name: String,
    pixels: RgbaImage,
}

impl SourceImage {
    pub fn new(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            name: name.into(),
            pixels,
        }
    }

    /// Decode an encoded image (PNG or JPEG)
    pub fn decode(name: impl Into<String>, bytes: &[u8]) -> OverlayResult<Self> {
        let pixels = image::load_from_memory(bytes)
            .map_err(OverlayError::Decode)?
            .to_rgba8();
        Ok(Self::new(name, pixels))
    }

    pub fn open(path: &Path) -> OverlayResult<Self> {
        let pixels = image::open(path).map_err(OverlayError::Decode)?.to_rgba8();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, pixels))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// File name for the rendered overlay: the original stem, lowercased,
    /// with every non-alphanumeric character replaced by `_`
    pub fn generated_name(&self, extension: &str) -> String {
        let stem = match self.name.rfind('.') {
            Some(i) if i + 1 < self.name.len() => &self.name[..i],
            _ => self.name.as_str(),
        };
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{}_generated.{}", stem, extension)
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("name", &self.name)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Transform placing the image element on screen
///
/// `matrix` maps image pixels to view pixels relative to `offset`, the view
/// position of the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    pub offset: Point,
    pub matrix: Matrix4,
}

impl DisplayTransform {
    /// CSS `transform` value for an element with `transform-origin: 0 0 0`
    pub fn css(&self) -> String {
        format!(
            "translate3d({}px,{}px,0) matrix3d({})",
            self.offset.x, self.offset.y, self.matrix
        )
    }

    /// Single 4x4 matrix including the offset
    pub fn composed(&self) -> Matrix4 {
        Matrix4::identity()
            .add_translation(self.offset.x, self.offset.y, 0.0)
            .multiply(&self.matrix)
    }
}

type Listener = Box<dyn Fn(&DisplayTransform) + Send + Sync>;

/// An image placed on the map by its four corners
pub struct ImageOverlay<V> {
    image: Arc<SourceImage>,
    corners: Corners,
    view: V,
    transform: DisplayTransform,
    listeners: Vec<Listener>,
}

impl<V: MapView> ImageOverlay<V> {
    /// Place an image on the map
    ///
    /// Persisted corners are used when any of them is non-zero; otherwise
    /// the image is centered in the view.
    pub fn new(image: Arc<SourceImage>, corners: Option<Corners>, view: V) -> OverlayResult<Self> {
        let corners = match corners {
            Some(c) if corners_valid(&c) => c,
            _ => fit_corners(image.size(), &view),
        };
        let transform = derive_transform(image.size(), &corners, &view)?;
        debug!("Placed overlay {:?} at {:?}", image.name(), corners);

        Ok(Self {
            image,
            corners,
            view,
            transform,
            listeners: Vec::new(),
        })
    }

    pub fn image(&self) -> &Arc<SourceImage> {
        &self.image
    }

    /// Snapshot of the current corners
    pub fn corners(&self) -> Corners {
        self.corners
    }

    pub fn corner(&self, corner: Corner) -> LatLng {
        self.corners[corner.index()]
    }

    /// Update a single corner
    pub fn set_corner(&mut self, corner: Corner, latlng: LatLng) -> OverlayResult<()> {
        let mut corners = self.corners;
        corners[corner.index()] = latlng;
        self.set_corners(corners)
    }

    /// Update all corners at once
    pub fn set_corners(&mut self, corners: Corners) -> OverlayResult<()> {
        let transform = derive_transform(self.image.size(), &corners, &self.view)?;
        self.corners = corners;
        self.commit(transform);
        Ok(())
    }

    /// Geographic bounding box of the corners
    pub fn bounds(&self) -> GeoBounds {
        GeoBounds::from_coords(&self.corners)
    }

    /// Corners in view pixels, converted through the current view
    pub fn pixel_corners(&self) -> [Point; 4] {
        self.corners.map(|c| self.view.lat_lng_to_pixel(c))
    }

    /// Visual center in view pixels
    ///
    /// Midpoint between the midpoints of the north and south edges. This is
    /// the pivot for scaling and rotating and differs from the area centroid
    /// once the image is distorted.
    pub fn center(&self) -> Point {
        quad_center(&self.pixel_corners())
    }

    pub fn transform(&self) -> &DisplayTransform {
        &self.transform
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Replace the host view after a pan or zoom
    pub fn set_view(&mut self, view: V) -> OverlayResult<()> {
        let transform = derive_transform(self.image.size(), &self.corners, &view)?;
        self.view = view;
        self.commit(transform);
        Ok(())
    }

    /// Register a callback invoked with every new display transform
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&DisplayTransform) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn commit(&mut self, transform: DisplayTransform) {
        self.transform = transform;
        debug!("Display transform updated: {}", transform.css());
        for listener in &self.listeners {
            listener(&self.transform);
        }
    }
}

/// Visual center of a quadrilateral ordered top-left, top-right, bottom-right, bottom-left
pub fn quad_center(c: &[Point; 4]) -> Point {
    let north = c[0].midpoint(c[1]);
    let south = c[2].midpoint(c[3]);
    north.midpoint(south)
}

/// Whether the corners hold a real placement (any non-zero coordinate)
pub fn corners_valid(corners: &Corners) -> bool {
    corners.iter().any(|c| !c.is_zero())
}

/// Corners centering an image in the view, shrunk to keep a margin free
pub fn fit_corners<V: MapView>(image: Size, view: &V) -> Corners {
    let map = view.size();
    let (map_w, map_h) = (map.width as f64, map.height as f64);
    let (img_w, img_h) = (image.width as f64, image.height as f64);

    let available_w = (map_w - 2.0 * FIT_PADDING).max(1.0);
    let available_h = (map_h - 2.0 * FIT_PADDING).max(1.0);
    let factor = (img_w / available_w).max(img_h / available_h).max(1.0);

    let offset_x = (map_w - img_w / factor) / 2.0;
    let offset_y = (map_h - img_h / factor) / 2.0;
    let (left, right) = (offset_x, map_w - offset_x);
    let (top, bottom) = (offset_y, map_h - offset_y);

    [
        view.pixel_to_lat_lng(Point::new(left, top)),
        view.pixel_to_lat_lng(Point::new(right, top)),
        view.pixel_to_lat_lng(Point::new(right, bottom)),
        view.pixel_to_lat_lng(Point::new(left, bottom)),
    ]
}

/// Derive the display transform for candidate corners
fn derive_transform<V: MapView>(
    image: Size,
    corners: &Corners,
    view: &V,
) -> OverlayResult<DisplayTransform> {
    let offset = view.lat_lng_to_pixel(corners[0]);
    let quad = corners.map(|c| view.lat_lng_to_pixel(c) - offset);

    let matrix = unit_square_to_quad(quad)?
        .scale_before(1.0 / image.width as f64, 1.0 / image.height as f64);
    // Zero-sized images scale by infinity
    if !matrix.is_finite() {
        return Err(OverlayError::SingularTransform);
    }

    Ok(DisplayTransform {
        offset,
        matrix: matrix.to_matrix_3d(),
    })
}
