//! mapwarp - place raster images on a web map by their four corners
//!
//! An [`overlay::ImageOverlay`] holds the geographic corners of an image and
//! the projective display transform derived from them. Corners can be edited
//! directly or through move, scale, rotate and distort gestures, and the
//! result exported either as a perspective-corrected raster or as a corner
//! configuration.

pub mod config;
pub mod edit;
pub mod error;
pub mod export;
pub mod geometry;
pub mod handle;
pub mod matrix;
pub mod overlay;
pub mod render;
pub mod server;
pub mod transform;
pub mod view;

pub use error::{OverlayError, OverlayResult};
pub use overlay::{Corner, Corners, ImageOverlay, SourceImage};
