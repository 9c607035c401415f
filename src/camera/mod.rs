pub mod capture;

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::CameraConfig;
use crate::transport::ws::WsTransport;
use crate::transport::{Transport, TransportError, TransportEvent};
use capture::{BufferPool, CapturePool};

/// Frames-per-second accounting over fixed one-second windows
#[derive(Debug)]
pub struct FpsWindow {
    window_start: Instant,
    count: u32,
}

impl FpsWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    /// Close the window if a second has passed, returning its count
    pub fn roll(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.window_start) < Duration::from_secs(1) {
            return None;
        }
        let count = self.count;
        self.count = 0;
        self.window_start = now;
        Some(count)
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not connected, or too soon since the last send
    Idle,
    /// Pool had nothing to lend
    Skipped,
    Sent(usize),
    SendFailed,
}

/// Camera-side capture/send loop.
///
/// Tracks connection state from transport events only. Reconnection is the
/// transport's job.
pub struct Producer<T, P> {
    transport: T,
    pool: P,
    min_interval: Duration,
    connected: bool,
    last_send: Option<Instant>,
    fps: FpsWindow,
    frames_sent: u64,
}

impl<T: Transport, P: CapturePool> Producer<T, P> {
    pub fn new(transport: T, pool: P, min_interval: Duration, now: Instant) -> Self {
        Self {
            transport,
            pool,
            min_interval,
            connected: false,
            last_send: None,
            fps: FpsWindow::new(now),
            frames_sent: 0,
        }
    }

    pub fn start(&mut self, uri: &str) -> Result<()> {
        self.transport
            .connect(uri)
            .with_context(|| format!("Failed to start connection to {}", uri))
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        // Must run every tick or lifecycle changes are never seen
        for event in self.transport.service_events() {
            match event {
                TransportEvent::Opened => {
                    info!("WebSocket Connected");
                    self.connected = true;
                }
                TransportEvent::Closed(code) => {
                    info!("WebSocket Disconnected: {}", code);
                    self.connected = false;
                }
                TransportEvent::Error(reason) => {
                    warn!("WebSocket error: {}", reason);
                    self.connected = false;
                }
                TransportEvent::Binary(data) => trace!("Ignoring {} byte inbound message", data.len()),
                TransportEvent::Text(text) => debug!("Server says: {}", text),
            }
        }

        let outcome = if self.connected && self.send_due(now) {
            self.last_send = Some(now);
            self.send_one()
        } else {
            TickOutcome::Idle
        };

        if let Some(fps) = self.fps.roll(now) {
            info!("FPS: {}", fps);
        }

        outcome
    }

    fn send_due(&self, now: Instant) -> bool {
        self.last_send
            .map_or(true, |last| now.duration_since(last) >= self.min_interval)
    }

    fn send_one(&mut self) -> TickOutcome {
        let Some(buffer) = self.pool.acquire() else {
            trace!("Capture pool empty, skipping tick");
            return TickOutcome::Skipped;
        };

        let len = buffer.as_ref().len();
        let result = self.transport.send_binary(buffer.as_ref());
        // Back to the pool whether or not the send worked
        self.pool.release(buffer);

        match result {
            Ok(()) => {
                self.fps.record();
                self.frames_sent += 1;
                TickOutcome::Sent(len)
            }
            Err(TransportError::Busy) => {
                debug!("Uplink busy, dropping frame");
                TickOutcome::SendFailed
            }
            Err(e) => {
                warn!("Frame send failed: {}", e);
                TickOutcome::SendFailed
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn shutdown(&mut self) {
        self.transport.close();
        self.connected = false;
    }
}

/// Camera entry point: open the frame source, dial the server and run the
/// send loop until Ctrl-C
pub async fn run(config: CameraConfig) -> Result<()> {
    let source = capture::open_source(&config).context("Camera init failed")?;
    let pool = BufferPool::new(source, config.buffer_count);
    let transport = WsTransport::with_reconnect(config.reconnect_interval);

    let mut producer = Producer::new(transport, pool, config.min_frame_interval, Instant::now());
    producer.start(&config.server_uri)?;
    info!(
        "Camera ready: {}x{} q{} -> {}",
        config.width, config.height, config.jpeg_quality, config.server_uri
    );

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                producer.tick(Instant::now());
            }
            _ = &mut shutdown => {
                info!(
                    "Shutting down camera after {} frames (connected: {})",
                    producer.frames_sent(),
                    producer.is_connected()
                );
                break;
            }
        }
    }

    producer.shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
