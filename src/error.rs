//! Error types for overlay editing and export

use thiserror::Error;

/// Errors that can occur while editing or exporting an overlay
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Three of the four correspondence points are (nearly) collinear
    #[error("singular transformation: corner configuration is degenerate")]
    SingularTransform,

    /// Corner index outside 0..=3
    #[error("invalid corner index: {0}")]
    InvalidCorner(usize),

    /// A per-corner gesture arrived without a handle
    #[error("distort gesture requires a corner handle")]
    MissingHandle,

    /// No image has been loaded yet
    #[error("no overlay image loaded")]
    NoImage,

    /// Source image could not be decoded
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// Off-screen surface could not be created
    #[error("render context unavailable: {0}")]
    RenderContextUnavailable(String),

    /// Rendered raster could not be encoded
    #[error("failed to encode rendered image: {0}")]
    EncodingFailure(#[source] image::ImageError),

    /// Background export task did not complete
    #[error("export task failed: {0}")]
    TaskFailed(String),
}

/// Result type for overlay operations
pub type OverlayResult<T> = Result<T, OverlayError>;
