//! Configuration management for mapwarp

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::{ExportSettings, OverlayConfig};
use crate::geometry::{LatLng, Size};
use crate::view::WebMercatorView;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Initial host map view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewConfig {
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
    pub center: LatLng,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            zoom: 3.0,
            width: 1280,
            height: 800,
            center: LatLng::new(0.0, 0.0),
        }
    }
}

impl ViewConfig {
    pub fn to_view(&self) -> WebMercatorView {
        WebMercatorView::new(self.center, self.zoom, Size::new(self.width, self.height))
    }
}

impl From<&WebMercatorView> for ViewConfig {
    fn from(view: &WebMercatorView) -> Self {
        Self {
            zoom: view.zoom,
            width: view.width,
            height: view.height,
            center: view.center,
        }
    }
}

/// Persisted overlay: the source image and where it was placed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Image loaded on startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,

    /// File name of the image the placement belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<OverlayConfig>,
}

impl OverlaySettings {
    /// Saved corners, if they were saved for an image of this name
    pub fn placement_for(&self, name: &str) -> Option<OverlayConfig> {
        match &self.original_file {
            Some(file) if file != name => None,
            _ => self.placement,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub view: ViewConfig,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub overlay: OverlaySettings,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
