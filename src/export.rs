//! Export of a placed overlay: the perspective-corrected raster and the
//! corner configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};

use crate::error::{OverlayError, OverlayResult};
use crate::geometry::{LatLng, PixelBounds, Point, Size};
use crate::matrix::Matrix3;
use crate::overlay::{corners_valid, Corners, ImageOverlay, SourceImage};
use crate::render::{Canvas, EncodedImage, ExportFormat};
use crate::transform::unit_square_to_quad;
use crate::view::MapView;

/// Encoding options for rendered exports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSettings {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Largest surface (in pixels) an export may allocate
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_max_pixels() -> u64 {
    64 * 1024 * 1024
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            jpeg_quality: default_jpeg_quality(),
            max_pixels: default_max_pixels(),
        }
    }
}

/// Geometry of a raster export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportPlan {
    /// Unit square to the quadrilateral inside the output unit square
    pub transform: Matrix3,
    /// Oversampling factor keeping the source resolution along every edge
    pub factor: f64,
    /// Output size in pixels
    pub width: u32,
    pub height: u32,
    /// Bounding box of the pixel corners
    pub pixel_bounds: PixelBounds,
}

/// Plan the export of an image placed at the given pixel corners
pub fn plan_export(corners: [Point; 4], image: Size) -> OverlayResult<ExportPlan> {
    let pixel_bounds = PixelBounds::from_points(&corners);
    let targets = corners.map(|p| pixel_bounds.to_unit(p));
    let transform = unit_square_to_quad(targets)?;

    let (w, h) = (image.width as f64, image.height as f64);
    let [tl, tr, br, bl] = corners;
    let factor = [
        w / tl.distance_to(tr),
        w / bl.distance_to(br),
        h / tl.distance_to(bl),
        h / tr.distance_to(br),
    ]
    .into_iter()
    .fold(f64::NEG_INFINITY, f64::max);

    if !factor.is_finite() || factor <= 0.0 {
        return Err(OverlayError::RenderContextUnavailable(format!(
            "invalid oversampling factor {}",
            factor
        )));
    }

    Ok(ExportPlan {
        transform,
        factor,
        width: (factor * pixel_bounds.width()).round() as u32,
        height: (factor * pixel_bounds.height()).round() as u32,
        pixel_bounds,
    })
}

/// A planned raster export, detached from the overlay
///
/// Holds its own reference to the source image so it can run after the
/// overlay lock is released.
#[derive(Debug)]
pub struct ExportJob {
    image: Arc<SourceImage>,
    plan: ExportPlan,
    settings: ExportSettings,
}

impl ExportJob {
    pub fn plan(&self) -> &ExportPlan {
        &self.plan
    }

    /// File name for the rendered output
    pub fn file_name(&self) -> String {
        self.image.generated_name(self.settings.format.extension())
    }

    /// Render and encode on the current thread
    pub fn render(&self) -> OverlayResult<EncodedImage> {
        let mut canvas = Canvas::new(self.plan.width, self.plan.height, self.settings.max_pixels)?;
        canvas.draw_image(self.image.pixels(), Some(&self.plan.transform));
        canvas.encode(self.settings.format, self.settings.jpeg_quality)
    }

    /// Render and encode on the blocking thread pool
    pub async fn run(self) -> OverlayResult<EncodedImage> {
        info!(
            "Exporting {:?} at {}x{} (factor {:.3})",
            self.image.name(),
            self.plan.width,
            self.plan.height,
            self.plan.factor
        );
        let encoded = task::spawn_blocking(move || self.render())
            .await
            .map_err(|e| OverlayError::TaskFailed(e.to_string()))??;
        info!("Export finished: {} bytes", encoded.bytes.len());
        Ok(encoded)
    }
}

/// Persistable corner configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    pub corners: Corners,
    /// `[south_west, north_east]`
    pub bounds: [LatLng; 2],
}

/// GeoJSON feature describing a placed overlay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PolygonGeometry,
    pub properties: OverlayProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Rings of `[lng, lat]` positions
    pub coordinates: Vec<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayProperties {
    pub original_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_file: Option<String>,
}

impl OverlayFeature {
    /// Read the corners back, if this is a well-formed overlay feature
    pub fn corners(&self) -> Option<Corners> {
        if self.kind != "Feature" || self.geometry.kind != "Polygon" {
            return None;
        }
        if self.properties.original_file.is_empty() {
            return None;
        }
        let ring = match self.geometry.coordinates.as_slice() {
            [ring] if ring.len() == 5 && ring[0] == ring[4] => ring,
            _ => return None,
        };

        let mut corners = [LatLng::default(); 4];
        for (corner, [lng, lat]) in corners.iter_mut().zip(ring.iter().copied()) {
            *corner = LatLng::new(lat, lng);
        }
        corners_valid(&corners).then_some(corners)
    }
}

/// Validate a GeoJSON value and read the overlay corners from it
pub fn corners_from_feature(value: &Value) -> Option<Corners> {
    OverlayFeature::deserialize(value).ok()?.corners()
}

fn format_num(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

impl<V: MapView> ImageOverlay<V> {
    /// Plan a raster export of the current placement
    pub fn export_plan(&self) -> OverlayResult<ExportPlan> {
        plan_export(self.pixel_corners(), self.image().size())
    }

    /// Snapshot everything an export needs
    pub fn export_job(&self, settings: &ExportSettings) -> OverlayResult<ExportJob> {
        let plan = self.export_plan()?;
        debug!("Export plan: {:?}", plan);
        Ok(ExportJob {
            image: self.image().clone(),
            plan,
            settings: settings.clone(),
        })
    }

    pub fn export_config(&self) -> OverlayConfig {
        let bounds = self.bounds();
        OverlayConfig {
            corners: self.corners(),
            bounds: [bounds.south_west, bounds.north_east],
        }
    }

    /// GeoJSON polygon of the corners, tagged with the image file names
    pub fn to_feature(&self, format: ExportFormat) -> OverlayFeature {
        let corners = self.corners();
        let mut ring: Vec<[f64; 2]> = corners.iter().map(|c| [c.lng, c.lat]).collect();
        ring.push(ring[0]);

        let bounds = self.bounds();
        let bbox = [bounds.west(), bounds.south(), bounds.east(), bounds.north()].map(format_num);

        OverlayFeature {
            kind: "Feature".to_string(),
            geometry: PolygonGeometry {
                kind: "Polygon".to_string(),
                coordinates: vec![ring],
                bbox: Some(bbox),
            },
            properties: OverlayProperties {
                original_file: self.image().name().to_string(),
                overlay_file: Some(self.image().generated_name(format.extension())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::tests::{square_overlay, test_image};
    use crate::overlay::Corner;
    use crate::view::IdentityView;

    #[test]
    fn test_plan_of_axis_aligned_square() {
        let overlay = square_overlay();
        let plan = overlay.export_plan().unwrap();
        // 200px image on a 100px square
        assert_eq!(plan.factor, 2.0);
        assert_eq!((plan.width, plan.height), (200, 200));
        assert_eq!(plan.pixel_bounds.width(), 100.0);
    }

    #[test]
    fn test_plan_of_distorted_quad() {
        let mut overlay = square_overlay();
        overlay.set_corner(Corner::BottomRight, LatLng::new(150.0, 130.0)).unwrap();
        let plan = overlay.export_plan().unwrap();

        assert!(plan.factor > 1.0);
        assert_eq!(plan.width, (plan.factor * 130.0).round() as u32);
        assert_eq!(plan.height, (plan.factor * 150.0).round() as u32);

        // Unit square corners land on the normalized quad
        let t = plan.transform;
        let br = t.transform_point(Point::new(1.0, 1.0)).unwrap();
        assert!((br.x - 1.0).abs() < 1e-9 && (br.y - 1.0).abs() < 1e-9);
        let tr = t.transform_point(Point::new(1.0, 0.0)).unwrap();
        assert!((tr.x - 100.0 / 130.0).abs() < 1e-9 && tr.y.abs() < 1e-9);
    }

    #[test]
    fn test_factor_uses_longest_needed_edge() {
        // Short left edge drives the factor: h / |TL-BL| = 100 / 20
        let corners = [
            Point::new(0.0, 40.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 60.0),
        ];
        let plan = plan_export(corners, Size::new(100, 100)).unwrap();
        assert!((plan.factor - 5.0).abs() < 1e-12);
        assert_eq!((plan.width, plan.height), (500, 500));
    }

    #[tokio::test]
    async fn test_export_renders_png() {
        let overlay = square_overlay();
        let job = overlay.export_job(&ExportSettings::default()).unwrap();
        assert_eq!(job.file_name(), "test_image_generated.png");

        let encoded = job.run().await.unwrap();
        assert_eq!(encoded.format, ExportFormat::Png);
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (200, 200));
        assert_eq!(decoded.get_pixel(100, 100)[3], 255);
    }

    async fn render(overlay: &ImageOverlay<IdentityView>) -> image::RgbaImage {
        let encoded = overlay
            .export_job(&ExportSettings::default())
            .unwrap()
            .run()
            .await
            .unwrap();
        image::load_from_memory(&encoded.bytes).unwrap().to_rgba8()
    }

    fn assert_pixel_close(
        out: &image::RgbaImage,
        (ox, oy): (u32, u32),
        src: &image::RgbaImage,
        (sx, sy): (u32, u32),
    ) {
        let (a, b) = (out.get_pixel(ox, oy), src.get_pixel(sx, sy));
        for c in 0..4 {
            assert!(
                (a[c] as i32 - b[c] as i32).abs() <= 2,
                "out({},{})={:?} src({},{})={:?}",
                ox,
                oy,
                a,
                sx,
                sy,
                b
            );
        }
    }

    #[tokio::test]
    async fn test_export_keeps_orientation() {
        let overlay = square_overlay();
        let out = render(&overlay).await;
        let src = overlay.image().pixels();
        let (w, h) = out.dimensions();
        assert_eq!((w, h), src.dimensions());

        assert_pixel_close(&out, (0, 0), src, (0, 0));
        assert_pixel_close(&out, (w - 1, 0), src, (w - 1, 0));
        assert_pixel_close(&out, (0, h - 1), src, (0, h - 1));
        assert_pixel_close(&out, (w - 1, h - 1), src, (w - 1, h - 1));
    }

    #[tokio::test]
    async fn test_export_of_quarter_turn() {
        let mut overlay = square_overlay();
        // Image turned clockwise: its top edge runs down the right side
        overlay
            .set_corners([
                LatLng::new(0.0, 100.0),
                LatLng::new(100.0, 100.0),
                LatLng::new(100.0, 0.0),
                LatLng::new(0.0, 0.0),
            ])
            .unwrap();
        let out = render(&overlay).await;
        let src = overlay.image().pixels();
        let (w, h) = out.dimensions();
        assert_eq!((w, h), (200, 200));

        assert_pixel_close(&out, (w - 1, 0), src, (0, 0));
        assert_pixel_close(&out, (w - 1, h - 1), src, (199, 0));
        assert_pixel_close(&out, (0, h - 1), src, (199, 199));
        assert_pixel_close(&out, (0, 0), src, (0, 199));
    }

    #[tokio::test]
    async fn test_export_leaves_outside_transparent() {
        let mut overlay = square_overlay();
        overlay.set_corner(Corner::TopRight, LatLng::new(50.0, 100.0)).unwrap();
        let encoded = overlay
            .export_job(&ExportSettings::default())
            .unwrap()
            .run()
            .await
            .unwrap();
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        let (w, _) = decoded.dimensions();
        // Triangle above the TL-TR edge is not covered
        assert_eq!(decoded.get_pixel(w - 2, 1)[3], 0);
    }

    #[tokio::test]
    async fn test_export_over_limit_fails() {
        let overlay = square_overlay();
        let settings = ExportSettings {
            max_pixels: 1000,
            ..ExportSettings::default()
        };
        let result = overlay.export_job(&settings).unwrap().run().await;
        assert!(matches!(result, Err(OverlayError::RenderContextUnavailable(_))));
    }

    #[test]
    fn test_config_round_trip() {
        let mut overlay = square_overlay();
        overlay.set_corner(Corner::BottomLeft, LatLng::new(120.0, -15.5)).unwrap();
        let config = overlay.export_config();
        assert_eq!(config.bounds[0], LatLng::new(0.0, -15.5));
        assert_eq!(config.bounds[1], LatLng::new(120.0, 100.0));

        let json = serde_json::to_string(&config).unwrap();
        let parsed: OverlayConfig = serde_json::from_str(&json).unwrap();
        let reloaded =
            ImageOverlay::new(test_image(200, 200), Some(parsed.corners), IdentityView::new(800, 600)).unwrap();
        assert_eq!(reloaded.corners(), overlay.corners());
        assert_eq!(reloaded.transform(), overlay.transform());
    }

    #[test]
    fn test_feature_round_trip() {
        let mut overlay = square_overlay();
        overlay.set_corner(Corner::TopLeft, LatLng::new(-0.1234567, 1.5)).unwrap();
        let value = serde_json::to_value(overlay.to_feature(ExportFormat::Png)).unwrap();

        assert_eq!(value["type"], "Feature");
        assert_eq!(value["geometry"]["coordinates"][0][0][0], 1.5);
        assert_eq!(value["geometry"]["coordinates"][0][4], value["geometry"]["coordinates"][0][0]);
        assert_eq!(value["geometry"]["bbox"][1], -0.123457);
        assert_eq!(value["properties"]["originalFile"], "Test Image.PNG");
        assert_eq!(value["properties"]["overlayFile"], "test_image_generated.png");

        assert_eq!(corners_from_feature(&value), Some(overlay.corners()));
    }

    #[test]
    fn test_rejects_foreign_features() {
        let value = serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]},
            "properties": {"originalFile": "a.png"}
        });
        assert_eq!(corners_from_feature(&value), None);

        let no_file = serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]},
            "properties": {}
        });
        assert_eq!(corners_from_feature(&no_file), None);
    }
}
