//! kinoserve - MJPEG streaming server for a single capture device.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kinoconf::KinoConfig;
use kinoscope::{Camera, CameraOptions, FrameSource, JpegFormatter, TestPatternSource};

#[derive(Parser)]
#[command(name = "kinoserve")]
#[command(about = "MJPEG streaming server for a single capture device")]
#[command(version)]
struct Cli {
    /// Config file path (replaces the local kinoscope.toml)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Bind address, or a unix socket path starting with '/'
    #[arg(long)]
    bind: Option<String>,

    /// TCP port
    #[arg(long)]
    port: Option<u16>,

    /// Capture device: an index, a /dev path, or "test"
    #[arg(long)]
    device: Option<String>,

    /// Keep capture running even with no consumers attached
    #[arg(long)]
    always_on: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config =
        KinoConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(device) = cli.device {
        config.camera.device = device;
    }
    if cli.always_on {
        config.camera.on_demand = false;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    info!("kinoserve {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        device = %config.camera.device,
        on_demand = config.camera.on_demand,
        "opening camera"
    );

    let source = open_source(&config.camera.device)?;
    let camera = Arc::new(
        Camera::open(
            source,
            Box::new(JpegFormatter::new()),
            CameraOptions {
                label: config.camera.device.clone(),
                on_demand: config.camera.on_demand,
            },
        )
        .await,
    );

    let serve_config = kinoserve::ServeConfig {
        bind: config.server.bind.clone(),
        port: config.server.port,
    };
    kinoserve::run(&serve_config, camera).await?;

    info!("kinoserve shutdown complete");
    Ok(())
}

fn open_source(device: &str) -> Result<Box<dyn FrameSource>> {
    if device == "test" {
        return Ok(Box::new(TestPatternSource::default()));
    }

    #[cfg(all(target_os = "linux", feature = "v4l2"))]
    {
        let source = match device.parse::<usize>() {
            Ok(index) => kinoscope::V4l2Source::new(index),
            Err(_) => kinoscope::V4l2Source::with_path(device),
        };
        Ok(Box::new(source))
    }

    #[cfg(not(all(target_os = "linux", feature = "v4l2")))]
    {
        anyhow::bail!(
            "capture device {device:?} needs the v4l2 feature on Linux; use device \"test\" elsewhere"
        )
    }
}
