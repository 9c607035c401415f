//! Viewer without a terminal UI: keeps the latest frame in memory and can
//! mirror it to a JPEG snapshot file.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{DisplaySurface, FeedClient, LogStatus};
use crate::config::ViewerConfig;
use crate::transport::ws::WsTransport;

/// Snapshots are rewritten at most this often
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
const SNAPSHOT_QUALITY: u8 = 90;

pub struct HeadlessSurface {
    current: Option<RgbaImage>,
    updates: u64,
    snapshot: Option<PathBuf>,
    last_snapshot: Option<Instant>,
}

impl HeadlessSurface {
    pub fn new(snapshot: Option<PathBuf>) -> Self {
        Self {
            current: None,
            updates: 0,
            snapshot,
            last_snapshot: None,
        }
    }

    pub fn current(&self) -> Option<&RgbaImage> {
        self.current.as_ref()
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn write_snapshot(&mut self) {
        let (Some(path), Some(image)) = (self.snapshot.as_ref(), self.current.as_ref()) else {
            return;
        };
        if self
            .last_snapshot
            .is_some_and(|at| at.elapsed() < SNAPSHOT_INTERVAL)
        {
            return;
        }

        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let result = std::fs::File::create(path)
            .map_err(image::ImageError::IoError)
            .and_then(|mut file| {
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut file, SNAPSHOT_QUALITY))
            });

        match result {
            Ok(()) => self.last_snapshot = Some(Instant::now()),
            Err(e) => warn!("Failed to write snapshot {}: {}", path.display(), e),
        }
    }
}

impl DisplaySurface for HeadlessSurface {
    fn set_image(&mut self, image: RgbaImage) {
        self.current = Some(image);
        self.updates += 1;
        self.write_snapshot();
    }
}

/// Run the viewer loop until Ctrl-C, logging status and frame rate
pub async fn run(config: ViewerConfig, snapshot: Option<PathBuf>) -> Result<()> {
    let tick_interval = config.tick_interval;
    let mut client = FeedClient::new(config, WsTransport::new(), HeadlessSurface::new(snapshot), LogStatus);
    client.start(Instant::now());

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut window_start = Instant::now();
    let mut window_base = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                client.service(now);

                if now.duration_since(window_start) >= Duration::from_secs(1) {
                    let shown = client.frames_shown();
                    if shown > window_base {
                        info!("Viewer FPS: {}", shown - window_base);
                    }
                    window_base = shown;
                    window_start = now;
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down viewer");
                break;
            }
        }
    }

    if let Some(image) = client.display().current() {
        info!(
            "Last frame {}x{} after {} updates",
            image.width(),
            image.height(),
            client.display().updates()
        );
    }
    client.disconnect();
    // Give the close handshake a moment to go out
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
