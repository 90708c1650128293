//! Interactive edit operations
//!
//! Gestures arrive as pairs of view pixel positions (the previous and the
//! current pointer position). Each operation maps the corners in pixel space
//! and commits them through the overlay setters.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{OverlayError, OverlayResult};
use crate::geometry::Point;
use crate::overlay::{Corner, ImageOverlay};
use crate::view::MapView;

/// The active editing tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    #[default]
    Idle,
    Move,
    Scale,
    Rotate,
    Distort,
}

impl EditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditMode::Idle => "idle",
            EditMode::Move => "move",
            EditMode::Scale => "scale",
            EditMode::Rotate => "rotate",
            EditMode::Distort => "distort",
        }
    }

    /// Whether corner handles are shown in this mode
    pub fn handles_visible(&self) -> bool {
        matches!(self, EditMode::Scale | EditMode::Rotate | EditMode::Distort)
    }

    /// Whether the image body itself can be dragged
    pub fn draggable(&self) -> bool {
        matches!(self, EditMode::Move)
    }
}

/// Edit mode state machine
#[derive(Debug, Default, Clone)]
pub struct Editor {
    mode: EditMode,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EditMode) {
        if self.mode != mode {
            debug!("Edit mode {} -> {}", self.mode.as_str(), mode.as_str());
        }
        self.mode = mode;
    }

    /// Toggle-button semantics: selecting the active mode deactivates it
    pub fn toggle(&mut self, mode: EditMode) -> EditMode {
        let next = if self.mode == mode { EditMode::Idle } else { mode };
        self.set_mode(next);
        next
    }

    /// Apply a drag gesture according to the current mode
    ///
    /// `handle` is the corner handle being dragged, if any. Returns `false`
    /// when no mode is active and the gesture was ignored.
    pub fn apply<V: MapView>(
        &self,
        overlay: &mut ImageOverlay<V>,
        handle: Option<Corner>,
        old: Point,
        new: Point,
    ) -> OverlayResult<bool> {
        match self.mode {
            EditMode::Idle => return Ok(false),
            EditMode::Move => overlay.move_by(old, new)?,
            EditMode::Scale => overlay.scale(old, new)?,
            EditMode::Rotate => overlay.rotate(old, new)?,
            EditMode::Distort => {
                let corner = handle.ok_or(OverlayError::MissingHandle)?;
                overlay.distort(corner, new)?
            }
        }
        Ok(true)
    }
}

impl<V: MapView> ImageOverlay<V> {
    /// Translate every corner by `new - old`
    ///
    /// Callers re-base `old` on every pointer event, so consecutive calls
    /// accumulate.
    pub fn move_by(&mut self, old: Point, new: Point) -> OverlayResult<()> {
        let delta = new - old;
        self.map_pixel_corners(|p| p + delta)
    }

    /// Uniform scale about the visual center by the ratio of the pointer's
    /// distances from it
    pub fn scale(&mut self, old: Point, new: Point) -> OverlayResult<()> {
        let center = self.center();
        let old_radius = center.distance_to(old);
        let ratio = center.distance_to(new) / old_radius;

        if old_radius == 0.0 || !ratio.is_finite() {
            warn!("Ignoring scale gesture starting at the image center");
            return Ok(());
        }
        if ratio == 1.0 {
            return Ok(());
        }

        self.map_pixel_corners(|p| (p - center) * ratio + center)
    }

    /// Rotate about the visual center by the angle the pointer swept
    pub fn rotate(&mut self, old: Point, new: Point) -> OverlayResult<()> {
        let center = self.center();
        if center.distance_to(old) == 0.0 || center.distance_to(new) == 0.0 {
            warn!("Ignoring rotate gesture touching the image center");
            return Ok(());
        }

        let angle = line_angle(center, new) - line_angle(center, old);
        if angle == 0.0 {
            return Ok(());
        }

        let (sin, cos) = angle.sin_cos();
        self.map_pixel_corners(|p| {
            let d = p - center;
            Point::new(cos * d.x - sin * d.y, sin * d.x + cos * d.y) + center
        })
    }

    /// Move a single corner to a new view position
    pub fn distort(&mut self, corner: Corner, new: Point) -> OverlayResult<()> {
        let latlng = self.view().pixel_to_lat_lng(new);
        debug!("Distort {} {:?} -> {:?}", corner.label(), self.corner(corner), latlng);
        self.set_corner(corner, latlng)
    }

    /// Orientation (radians) of each corner handle: the bisector of the two
    /// edges meeting at that corner
    pub fn handle_angles(&self) -> [f64; 4] {
        let c = self.pixel_corners();
        Corner::ALL.map(|corner| {
            let (a, b) = corner.adjacent();
            mid_angle(c[corner.index()], c[a.index()], c[b.index()])
        })
    }

    fn map_pixel_corners(&mut self, f: impl Fn(Point) -> Point) -> OverlayResult<()> {
        let corners = self
            .pixel_corners()
            .map(|p| self.view().pixel_to_lat_lng(f(p)));
        self.set_corners(corners)
    }
}

/// Angle of the line from `b` towards `a`
fn line_angle(a: Point, b: Point) -> f64 {
    (a.y - b.y).atan2(a.x - b.x)
}

/// Angle of the bisector between the lines a-b and a-c
fn mid_angle(a: Point, b: Point, c: Point) -> f64 {
    let dir = a.direction_to(b) + a.direction_to(c);
    dir.y.atan2(dir.x)
}
