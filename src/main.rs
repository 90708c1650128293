//! mapwarp - interactive image-to-map georeferencing
//!
//! Serves an HTTP API for placing an image on a web map by dragging its
//! corners, and renders the perspective-corrected result. With `--export`
//! it renders the saved placement once and exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mapwarp::config::Config;
use mapwarp::server::{self, AppState};
use mapwarp::{ImageOverlay, SourceImage};

/// mapwarp - georeference images by their four corners
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Web server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Image to load on startup
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Render the saved placement to this file and exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("mapwarp v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_or_create(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let image_path = args.image.or_else(|| config.overlay.image.clone());
    let image = match &image_path {
        Some(path) => Some(
            SourceImage::open(path).with_context(|| format!("Failed to load image {:?}", path))?,
        ),
        None => None,
    };

    if let Some(output) = args.export {
        let Some(image) = image else {
            bail!("--export requires an image (--image or [overlay].image in the config)");
        };
        return export_once(&config, image, &output).await;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, args.config.clone()));
    if let Some(image) = image {
        state.load_image(image, None).context("Failed to place image")?;
    }

    info!("Starting web server at http://{}", addr);
    server::run_server(&addr, state).await
}

/// Headless export of the saved placement
async fn export_once(config: &Config, image: SourceImage, output: &Path) -> Result<()> {
    let placement = config.overlay.placement_for(image.name());
    if placement.is_none() {
        info!("No saved placement for {:?}, fitting to the view", image.name());
    }

    let overlay = ImageOverlay::new(
        Arc::new(image),
        placement.map(|p| p.corners),
        config.view.to_view(),
    )
    .context("Invalid overlay placement")?;

    let encoded = overlay
        .export_job(&config.export)
        .context("Failed to plan export")?
        .run()
        .await
        .context("Failed to render overlay")?;

    std::fs::write(output, &encoded.bytes)
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!(
        "Wrote {}x{} {} to {:?}",
        encoded.width,
        encoded.height,
        encoded.format.mime_type(),
        output
    );
    Ok(())
}
