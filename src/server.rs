//! Web server for the overlay editing API

use anyhow::Result;
use arc_swap::{ArcSwap, ArcSwapOption};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::{Config, ViewConfig};
use crate::edit::{EditMode, Editor};
use crate::error::{OverlayError, OverlayResult};
use crate::export::{corners_from_feature, OverlayFeature};
use crate::geometry::{GeoBounds, LatLng, Point};
use crate::handle::{overlay_handles, Handle};
use crate::overlay::{Corner, Corners, ImageOverlay, SourceImage};
use crate::view::WebMercatorView;

/// Largest accepted request body (base64 image uploads)
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

type Overlay = ImageOverlay<WebMercatorView>;

/// Shared application state
pub struct AppState {
    /// Configuration (with the persisted placement)
    pub config: Arc<RwLock<Config>>,
    /// Path to save configuration
    config_path: PathBuf,
    /// Current host map view
    view: ArcSwap<WebMercatorView>,
    /// Most recently loaded source image
    image: ArcSwapOption<SourceImage>,
    overlay: RwLock<Option<Overlay>>,
    editor: Mutex<Editor>,
    /// Bumped on every display transform change
    revision: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        let view = config.view.to_view();
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            view: ArcSwap::from_pointee(view),
            image: ArcSwapOption::empty(),
            overlay: RwLock::new(None),
            editor: Mutex::new(Editor::new()),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn view(&self) -> WebMercatorView {
        **self.view.load()
    }

    pub fn image(&self) -> Option<Arc<SourceImage>> {
        self.image.load_full()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Place a newly loaded image
    ///
    /// `corners` takes precedence; otherwise the saved corners are reused if
    /// they belong to an image of the same name.
    pub fn load_image(&self, image: SourceImage, corners: Option<Corners>) -> OverlayResult<()> {
        let image = Arc::new(image);
        let corners = corners.or_else(|| {
            self.config
                .read()
                .overlay
                .placement_for(image.name())
                .map(|p| p.corners)
        });

        // The view must not change between building the overlay and installing it
        let mut guard = self.overlay.write();
        let view = self.view();

        let mut overlay = match ImageOverlay::new(image.clone(), corners, view) {
            Err(OverlayError::SingularTransform) if corners.is_some() => {
                warn!("Placement for {:?} is degenerate, fitting to view", image.name());
                ImageOverlay::new(image.clone(), None, view)?
            }
            result => result?,
        };

        let revision = self.revision.clone();
        overlay.on_change(move |_| {
            revision.fetch_add(1, Ordering::SeqCst);
        });

        info!("Loaded image {:?} ({}x{})", image.name(), image.width(), image.height());
        *guard = Some(overlay);
        self.image.store(Some(image));
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Run a mutation against the loaded overlay
    pub fn with_overlay<T>(&self, f: impl FnOnce(&mut Overlay) -> OverlayResult<T>) -> OverlayResult<T> {
        let mut guard = self.overlay.write();
        let overlay = guard.as_mut().ok_or(OverlayError::NoImage)?;
        f(overlay)
    }

    /// Switch the host view after a pan or zoom
    pub fn set_view(&self, view: WebMercatorView) -> OverlayResult<()> {
        let mut guard = self.overlay.write();
        if let Some(overlay) = guard.as_mut() {
            overlay.set_view(view)?;
        }
        self.view.store(Arc::new(view));
        Ok(())
    }

    /// Toggle an edit mode, returning the resulting mode
    pub fn toggle_mode(&self, mode: EditMode) -> EditMode {
        self.editor.lock().toggle(mode)
    }

    /// Apply a drag gesture in the current mode
    pub fn drag(&self, handle: Option<Corner>, from: Point, to: Point) -> OverlayResult<bool> {
        let editor = self.editor.lock().clone();
        self.with_overlay(|overlay| editor.apply(overlay, handle, from, to))
    }

    fn overlay_response(&self) -> OverlayResult<OverlayResponse> {
        let mode = self.editor.lock().mode();
        let guard = self.overlay.read();
        let overlay = guard.as_ref().ok_or(OverlayError::NoImage)?;

        Ok(OverlayResponse {
            name: overlay.image().name().to_string(),
            width: overlay.image().width(),
            height: overlay.image().height(),
            corners: overlay.corners(),
            bounds: overlay.bounds(),
            center: overlay.center(),
            handles: overlay_handles(overlay, mode),
            mode,
            css: overlay.transform().css(),
            matrix: overlay.transform().composed().to_string(),
            revision: self.revision(),
        })
    }

    /// Save configuration, including the current view and placement, to file
    pub fn save_config(&self) -> Result<()> {
        let mut config = self.config.write();
        config.view = ViewConfig::from(&self.view());
        if let Some(overlay) = self.overlay.read().as_ref() {
            config.overlay.original_file = Some(overlay.image().name().to_string());
            config.overlay.placement = Some(overlay.export_config());
        }
        config.save(&self.config_path)
    }
}

/// Error returned by API handlers
#[derive(Debug)]
pub enum ApiError {
    Overlay(OverlayError),
    BadRequest(String),
    Internal(String),
}

impl From<OverlayError> for ApiError {
    fn from(e: OverlayError) -> Self {
        ApiError::Overlay(e)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Overlay(e) => {
                let status = match e {
                    OverlayError::SingularTransform
                    | OverlayError::InvalidCorner(_)
                    | OverlayError::MissingHandle => StatusCode::UNPROCESSABLE_ENTITY,
                    OverlayError::NoImage => StatusCode::CONFLICT,
                    OverlayError::Decode(_) => StatusCode::BAD_REQUEST,
                    OverlayError::RenderContextUnavailable(_)
                    | OverlayError::EncodingFailure(_)
                    | OverlayError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        if status.is_server_error() {
            error!("Request failed: {}", message);
        } else {
            warn!("Request rejected: {}", message);
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/info", get(get_info))
        .route("/api/image", post(load_image))
        .route("/api/view", post(set_view))
        .route("/api/overlay", get(get_overlay))
        .route("/api/overlay/corners", post(set_corners))
        .route("/api/overlay/corner/:id", post(update_corner))
        .route("/api/overlay/mode", post(set_mode))
        .route("/api/overlay/drag", post(drag))
        .route("/api/overlay/export", get(export_image))
        .route("/api/overlay/config", get(export_config))
        .route("/api/overlay/save", post(save_overlay))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Loaded image summary
#[derive(Serialize)]
struct ImageInfo {
    name: String,
    width: u32,
    height: u32,
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    view: WebMercatorView,
    image: Option<ImageInfo>,
    revision: u64,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let image = state.image().map(|image| ImageInfo {
        name: image.name().to_string(),
        width: image.width(),
        height: image.height(),
    });

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        view: state.view(),
        image,
        revision: state.revision(),
    })
}

/// Current overlay state
#[derive(Serialize)]
struct OverlayResponse {
    name: String,
    width: u32,
    height: u32,
    corners: Corners,
    bounds: GeoBounds,
    /// Visual center in view pixels
    center: Point,
    handles: Vec<Handle>,
    mode: EditMode,
    css: String,
    /// `matrix3d` arguments with the offset folded in
    matrix: String,
    revision: u64,
}

async fn get_overlay(State(state): State<Arc<AppState>>) -> Result<Json<OverlayResponse>, ApiError> {
    Ok(Json(state.overlay_response()?))
}

/// Request to load an image
#[derive(Deserialize)]
struct LoadImageRequest {
    name: String,
    /// Base64 payload, optionally as a `data:` URL
    data: String,
    /// Previously exported GeoJSON placement for this image
    #[serde(default)]
    feature: Option<Value>,
}

async fn load_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadImageRequest>,
) -> Result<Json<OverlayResponse>, ApiError> {
    let payload = match req.data.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => req.data.as_str(),
    };
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 image data: {}", e)))?;

    let corners = match &req.feature {
        Some(feature) => Some(feature_corners(feature, &req.name)?),
        None => None,
    };

    let name = req.name;
    let image = tokio::task::spawn_blocking(move || SourceImage::decode(name, &bytes))
        .await
        .map_err(|e| OverlayError::TaskFailed(e.to_string()))??;

    state.load_image(image, corners)?;
    Ok(Json(state.overlay_response()?))
}

/// Corners of an overlay feature exported for the image `name`
fn feature_corners(feature: &Value, name: &str) -> Result<Corners, ApiError> {
    let corners = corners_from_feature(feature)
        .ok_or_else(|| ApiError::BadRequest("not an image overlay feature".to_string()))?;
    match feature["properties"]["originalFile"].as_str() {
        Some(file) if file == name => Ok(corners),
        other => Err(ApiError::BadRequest(format!(
            "feature belongs to {:?}, not {:?}",
            other.unwrap_or_default(),
            name
        ))),
    }
}

async fn set_view(
    State(state): State<Arc<AppState>>,
    Json(view): Json<WebMercatorView>,
) -> Result<Json<WebMercatorView>, ApiError> {
    state.set_view(view)?;
    Ok(Json(view))
}

/// Request to set all corners
#[derive(Deserialize)]
struct SetCornersRequest {
    corners: Corners,
}

async fn set_corners(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetCornersRequest>,
) -> Result<Json<OverlayResponse>, ApiError> {
    state.with_overlay(|overlay| overlay.set_corners(req.corners))?;
    Ok(Json(state.overlay_response()?))
}

/// Update a single corner
async fn update_corner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
    Json(latlng): Json<LatLng>,
) -> Result<Json<OverlayResponse>, ApiError> {
    let corner = Corner::try_from(id)?;
    state.with_overlay(|overlay| overlay.set_corner(corner, latlng))?;
    Ok(Json(state.overlay_response()?))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: EditMode,
}

#[derive(Serialize)]
struct ModeResponse {
    mode: EditMode,
    handles_visible: bool,
    draggable: bool,
}

/// Toggle an edit mode
async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModeRequest>,
) -> Json<ModeResponse> {
    let mode = state.toggle_mode(req.mode);
    Json(ModeResponse {
        mode,
        handles_visible: mode.handles_visible(),
        draggable: mode.draggable(),
    })
}

/// A drag gesture in view pixels
#[derive(Deserialize)]
struct DragRequest {
    #[serde(default)]
    handle: Option<usize>,
    from: Point,
    to: Point,
}

async fn drag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DragRequest>,
) -> Result<Json<OverlayResponse>, ApiError> {
    let handle = req.handle.map(Corner::try_from).transpose()?;
    state.drag(handle, req.from, req.to)?;
    Ok(Json(state.overlay_response()?))
}

/// Render the overlay and return the encoded image
async fn export_image(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let settings = state.config.read().export.clone();
    let job = {
        let guard = state.overlay.read();
        let overlay = guard.as_ref().ok_or(OverlayError::NoImage)?;
        overlay.export_job(&settings)?
    };

    let file_name = job.file_name();
    let encoded = job.run().await?;

    Ok((
        [
            (header::CONTENT_TYPE, encoded.format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        encoded.bytes,
    )
        .into_response())
}

/// Corner configuration as a GeoJSON feature
async fn export_config(State(state): State<Arc<AppState>>) -> Result<Json<OverlayFeature>, ApiError> {
    let format = state.config.read().export.format;
    let guard = state.overlay.read();
    let overlay = guard.as_ref().ok_or(OverlayError::NoImage)?;
    Ok(Json(overlay.to_feature(format)))
}

/// Persist the placement to the config file
async fn save_overlay(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state
        .save_config()
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(StatusCode::OK)
}
