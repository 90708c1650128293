//! Software rasterizer for drawing images through projective transforms
//!
//! A [`Canvas`] is an off-screen RGBA surface scoped to one export. It is
//! allocated fallibly, released when dropped, and drawn into row by row in
//! parallel.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OverlayError, OverlayResult};
use crate::matrix::Matrix3;

/// Output encoding for rendered images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    /// Lossy; the alpha channel is dropped
    Jpeg,
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }
}

/// An encoded raster image
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// An axis-aligned rectangle in pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering an image of the given size
    pub fn of_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    #[inline]
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// An off-screen RGBA drawing surface
pub struct Canvas {
    surface: RgbaImage,
}

impl Canvas {
    /// Allocate a transparent surface
    ///
    /// Fails when a dimension is zero, the surface would exceed `max_pixels`,
    /// or the memory cannot be reserved.
    pub fn new(width: u32, height: u32, max_pixels: u64) -> OverlayResult<Self> {
        if width == 0 || height == 0 {
            return Err(OverlayError::RenderContextUnavailable(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }

        let pixels = width as u64 * height as u64;
        if pixels > max_pixels {
            return Err(OverlayError::RenderContextUnavailable(format!(
                "surface {}x{} exceeds the limit of {} pixels",
                width, height, max_pixels
            )));
        }

        let len = usize::try_from(pixels * 4).map_err(|_| {
            OverlayError::RenderContextUnavailable(format!("surface {}x{} too large", width, height))
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| OverlayError::RenderContextUnavailable(e.to_string()))?;
        data.resize(len, 0);

        let surface = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            OverlayError::RenderContextUnavailable("surface buffer size mismatch".to_string())
        })?;
        debug!("Allocated {}x{} render surface", width, height);

        Ok(Self { surface })
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.surface
    }

    /// Draw the whole image over the whole canvas
    ///
    /// `transform` operates on the unit square: `(0,0)`..`(1,1)` is the
    /// destination rectangle before the transform is applied.
    pub fn draw_image(&mut self, image: &RgbaImage, transform: Option<&Matrix3>) {
        let src = Rect::of_size(image.width(), image.height());
        let dst = Rect::of_size(self.width(), self.height());
        self.draw_image_rect(image, transform, src, dst);
    }

    /// Draw the `src` part of an image into `dst`, distorted by `transform`
    pub fn draw_image_rect(
        &mut self,
        image: &RgbaImage,
        transform: Option<&Matrix3>,
        src: Rect,
        dst: Rect,
    ) {
        if image.width() == 0 || image.height() == 0 || src.width <= 0.0 || src.height <= 0.0 {
            return;
        }

        // Source pixels -> unit square -> transformed unit square -> canvas pixels
        let to_canvas = transform
            .copied()
            .unwrap_or_default()
            .scale_before(1.0 / src.width, 1.0 / src.height)
            .translate_before(-src.x, -src.y)
            .scale_after(dst.width, dst.height)
            .translate_after(dst.x, dst.y);
        // The scale of the inverse cancels in the homogeneous division
        let to_source = to_canvas.adjugate();

        let stride = self.width() as usize * 4;
        let surface: &mut [u8] = &mut self.surface;
        surface
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.chunks_exact_mut(4).enumerate() {
                    let [sx, sy, w] = to_source.multiply_vector([x as f64 + 0.5, y as f64 + 0.5, 1.0]);
                    if w == 0.0 {
                        continue;
                    }
                    let (sx, sy) = (sx / w, sy / w);
                    if !src.contains(sx, sy) {
                        continue;
                    }
                    blend_over(out, bilinear_sample(image, sx - 0.5, sy - 0.5));
                }
            });
    }

    /// Encode the surface
    pub fn encode(&self, format: ExportFormat, jpeg_quality: u8) -> OverlayResult<EncodedImage> {
        let (width, height) = (self.width(), self.height());
        let mut bytes = Vec::new();

        match format {
            ExportFormat::Png => PngEncoder::new(&mut bytes)
                .write_image(self.surface.as_raw(), width, height, ColorType::Rgba8)
                .map_err(OverlayError::EncodingFailure)?,
            ExportFormat::Jpeg => {
                let rgb = RgbImage::from_fn(width, height, |x, y| {
                    let p = self.surface.get_pixel(x, y);
                    Rgb([p[0], p[1], p[2]])
                });
                JpegEncoder::new_with_quality(&mut bytes, jpeg_quality)
                    .encode(rgb.as_raw(), width, height, ColorType::Rgb8)
                    .map_err(OverlayError::EncodingFailure)?
            }
        }

        Ok(EncodedImage {
            format,
            width,
            height,
            bytes,
        })
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        debug!("Released {}x{} render surface", self.width(), self.height());
    }
}

/// Bilinear interpolation with clamp-to-edge addressing
#[inline]
fn bilinear_sample(image: &RgbaImage, x: f64, y: f64) -> [u8; 4] {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let stride = width * 4;
    let src = image.as_raw();

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let mut result = [0u8; 4];
    for (c, value) in result.iter_mut().enumerate() {
        let p00 = src[y0 * stride + x0 * 4 + c] as f64;
        let p10 = src[y0 * stride + x1 * 4 + c] as f64;
        let p01 = src[y1 * stride + x0 * 4 + c] as f64;
        let p11 = src[y1 * stride + x1 * 4 + c] as f64;

        let v = p00 * (1.0 - fx) * (1.0 - fy)
            + p10 * fx * (1.0 - fy)
            + p01 * (1.0 - fx) * fy
            + p11 * fx * fy;

        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    result
}

/// Source-over compositing of a straight-alpha pixel
#[inline]
fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let sa = src[3] as f64 / 255.0;
    let da = dst[3] as f64 / 255.0;
    if src[3] == 255 || dst[3] == 0 {
        dst.copy_from_slice(&src);
        return;
    }
    if src[3] == 0 {
        return;
    }

    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let v = (src[c] as f64 * sa + dst[c] as f64 * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::transform::unit_square_to_quad;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 20) as u8, (y * 20) as u8, 200, 255]))
    }

    #[test]
    fn test_zero_size_surface_rejected() {
        assert!(matches!(
            Canvas::new(0, 10, u64::MAX),
            Err(OverlayError::RenderContextUnavailable(_))
        ));
    }

    #[test]
    fn test_surface_limit() {
        assert!(matches!(
            Canvas::new(100, 100, 9_999),
            Err(OverlayError::RenderContextUnavailable(_))
        ));
        assert!(Canvas::new(100, 100, 10_000).is_ok());
    }

    #[test]
    fn test_identity_draw_copies_pixels() {
        let image = gradient(7, 5);
        let mut canvas = Canvas::new(7, 5, u64::MAX).unwrap();
        canvas.draw_image(&image, None);
        assert_eq!(canvas.pixels(), &image);
    }

    #[test]
    fn test_transform_limits_drawn_area() {
        let image = gradient(8, 8);
        let mut canvas = Canvas::new(20, 10, u64::MAX).unwrap();
        // Left half of the canvas only
        let transform = unit_square_to_quad([
            Point::new(0.0, 0.0),
            Point::new(0.5, 0.0),
            Point::new(0.5, 1.0),
            Point::new(0.0, 1.0),
        ])
        .unwrap();
        canvas.draw_image(&image, Some(&transform));

        assert_eq!(canvas.pixels().get_pixel(2, 5)[3], 255);
        assert_eq!(canvas.pixels().get_pixel(9, 9)[3], 255);
        assert_eq!(canvas.pixels().get_pixel(10, 0)[3], 0);
        assert_eq!(canvas.pixels().get_pixel(19, 9)[3], 0);
    }

    #[test]
    fn test_upscale_interpolates() {
        let image = RgbaImage::from_fn(2, 1, |x, _| Rgba([x as u8 * 200, 0, 0, 255]));
        let mut canvas = Canvas::new(8, 1, u64::MAX).unwrap();
        canvas.draw_image(&image, None);
        let reds: Vec<u8> = canvas.pixels().pixels().map(|p| p[0]).collect();
        assert_eq!(reds[0], 0);
        assert_eq!(reds[7], 200);
        assert!(reds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_encode_png() {
        let mut canvas = Canvas::new(6, 4, u64::MAX).unwrap();
        canvas.draw_image(&gradient(3, 2), None);
        let encoded = canvas.encode(ExportFormat::Png, 90).unwrap();
        assert_eq!(&encoded.bytes[1..4], b"PNG");

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert_eq!(&decoded, canvas.pixels());
    }

    #[test]
    fn test_encode_jpeg() {
        let mut canvas = Canvas::new(16, 16, u64::MAX).unwrap();
        canvas.draw_image(&gradient(4, 4), None);
        let encoded = canvas.encode(ExportFormat::Jpeg, 80).unwrap();
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(encoded.format.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_blend_over() {
        let mut dst = [0, 0, 255, 255];
        blend_over(&mut dst, [255, 0, 0, 0]);
        assert_eq!(dst, [0, 0, 255, 255]);

        blend_over(&mut dst, [255, 0, 0, 255]);
        assert_eq!(dst, [255, 0, 0, 255]);

        let mut half = [0, 0, 0, 255];
        blend_over(&mut half, [255, 255, 255, 128]);
        assert_eq!(half[3], 255);
        assert!((half[0] as i32 - 128).abs() <= 1);
    }
}
