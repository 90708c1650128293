//! Corner handle descriptors for the editing UI

use serde::{Deserialize, Serialize};

use crate::edit::EditMode;
use crate::overlay::{Corner, ImageOverlay};
use crate::view::MapView;

/// Icon shown on a handle for the active mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandleIcon {
    Scale,
    Rotate,
    Distort,
}

impl HandleIcon {
    pub fn for_mode(mode: EditMode) -> Option<Self> {
        match mode {
            EditMode::Scale => Some(HandleIcon::Scale),
            EditMode::Rotate => Some(HandleIcon::Rotate),
            EditMode::Distort => Some(HandleIcon::Distort),
            EditMode::Idle | EditMode::Move => None,
        }
    }
}

/// A labeled, draggable corner handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handle {
    pub id: usize,
    pub corner: Corner,
    pub label: String,
    /// View pixel position
    pub x: f64,
    pub y: f64,
    /// Icon rotation in degrees
    pub angle: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<HandleIcon>,
}

/// Get the four corner handles of an overlay for the given mode
///
/// Handles are listed even when the mode hides them so that a client can
/// keep its markers in sync; `icon` is `None` in that case.
pub fn overlay_handles<V: MapView>(overlay: &ImageOverlay<V>, mode: EditMode) -> Vec<Handle> {
    let positions = overlay.pixel_corners();
    let angles = overlay.handle_angles();
    let icon = HandleIcon::for_mode(mode);

    Corner::ALL
        .iter()
        .map(|&corner| {
            let i = corner.index();
            Handle {
                id: i,
                corner,
                label: corner.label().to_string(),
                x: positions[i].x,
                y: positions[i].y,
                // Icons are drawn pointing outwards, away from the bisector
                angle: 180.0 + angles[i].to_degrees(),
                icon,
            }
        })
        .collect()
}
