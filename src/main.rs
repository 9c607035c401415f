mod camera;
mod cli;
mod config;
mod logging;
mod protocol;
mod relay;
mod transport;
mod tui;
mod viewer;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use config::{CameraConfig, SettingsFile, ViewerConfig};
use logging::LogOutput;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Camera {
            server,
            config: config_path,
            source,
            interval_ms,
            reconnect_s,
            width,
            height,
            quality,
            buffers,
        } => {
            logging::init(LogOutput::Stderr)?;

            let settings = SettingsFile::load_optional(config_path.as_deref())?;
            let mut camera_config = CameraConfig::default();
            settings.apply_camera(&mut camera_config)?;

            if let Some(server) = server {
                camera_config.server_uri = server;
            }
            if let Some(source) = source {
                camera_config.source = source.parse()?;
            }
            if let Some(ms) = interval_ms {
                camera_config.min_frame_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = reconnect_s {
                camera_config.reconnect_interval = config::secs_to_duration(secs)?;
            }
            if let Some(width) = width {
                camera_config.width = width;
            }
            if let Some(height) = height {
                camera_config.height = height;
            }
            if let Some(quality) = quality {
                camera_config.jpeg_quality = quality;
            }
            if let Some(count) = buffers {
                camera_config.buffer_count = count;
            }
            camera_config.validate().context("Invalid camera configuration")?;

            camera::run(camera_config).await?;
        }
        Commands::Viewer {
            server,
            config: config_path,
            reconnect_s,
            no_auto_connect,
            headless,
            snapshot,
            graphics,
            log_file,
        } => {
            let output = match (&log_file, headless) {
                (Some(path), _) => LogOutput::File(path),
                (None, true) => LogOutput::Stderr,
                (None, false) => LogOutput::Off,
            };
            logging::init(output)?;

            let settings = SettingsFile::load_optional(config_path.as_deref())?;
            let mut viewer_config = ViewerConfig::default();
            settings.apply_viewer(&mut viewer_config)?;

            if let Some(server) = server {
                viewer_config.server_uri = server;
            }
            if let Some(secs) = reconnect_s {
                viewer_config.reconnect_delay = config::secs_to_duration(secs)?;
            }
            if no_auto_connect {
                viewer_config.auto_connect = false;
            }
            viewer_config.validate().context("Invalid viewer configuration")?;

            if headless {
                viewer::headless::run(viewer_config, snapshot).await?;
            } else {
                tui::run(viewer_config, graphics.as_deref()).await?;
            }
        }
        Commands::Relay { addr } => {
            logging::init(LogOutput::Stderr)?;
            relay::start_relay(addr).await?;
        }
    }

    Ok(())
}
