//! Viewer-side connection state machine.
//!
//! `FeedClient` owns the one transport connection, the retry policy and the
//! display surface. The host calls [`FeedClient::service`] once per tick; every
//! transport event and every retry wake-up is handled inside that call.

pub mod decode;
pub mod headless;

use image::RgbaImage;
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ViewerConfig;
use crate::protocol::{CloseCode, VIEWER_IDENT};
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(label)
    }
}

/// Where decoded frames go
pub trait DisplaySurface {
    fn set_image(&mut self, image: RgbaImage);
}

/// Where human-readable status text goes
pub trait StatusSink {
    fn report(&mut self, text: &str);
}

impl StatusSink for mpsc::UnboundedSender<String> {
    fn report(&mut self, text: &str) {
        let _ = self.send(text.to_string());
    }
}

/// Status sink that only logs
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn report(&mut self, text: &str) {
        info!(target: "camfeed::status", "{}", text);
    }
}

/// The pending reconnect loop. Dropping it cancels it.
#[derive(Debug)]
struct RetryTask {
    next_wake: Instant,
}

pub struct FeedClient<T, D, S> {
    config: ViewerConfig,
    transport: T,
    display: D,
    status: S,
    state: ConnectionState,
    retry: Option<RetryTask>,
    last_error: Option<String>,
    last_close: Option<CloseCode>,
    frames_shown: u64,
    frames_rejected: u64,
}

impl<T: Transport, D: DisplaySurface, S: StatusSink> FeedClient<T, D, S> {
    pub fn new(config: ViewerConfig, transport: T, display: D, status: S) -> Self {
        Self {
            config,
            transport,
            display,
            status,
            state: ConnectionState::Disconnected,
            retry: None,
            last_error: None,
            last_close: None,
            frames_shown: 0,
            frames_rejected: 0,
        }
    }

    /// Report the initial status and connect if configured to
    pub fn start(&mut self, now: Instant) {
        self.status.report("Disconnected");
        if self.config.auto_connect {
            self.connect(now);
        }
    }

    pub fn connect(&mut self, now: Instant) {
        if self.state != ConnectionState::Disconnected {
            debug!("connect() ignored while {}", self.state);
            return;
        }

        self.state = ConnectionState::Connecting;
        self.last_error = None;
        self.status.report("Connecting...");
        info!("Connecting to {}", self.config.server_uri);

        if let Err(e) = self.transport.connect(&self.config.server_uri) {
            warn!("WebSocket connection failed: {}", e);
            self.state = ConnectionState::Disconnected;
            self.status.report(&format!("Connection failed: {}", e));
            self.last_error = Some(e.to_string());
            self.schedule_retry(now);
        }
    }

    /// Drop the connection and stop reconnecting
    pub fn disconnect(&mut self) {
        if self.retry.take().is_some() {
            debug!("Pending reconnect cancelled");
        }
        if self.state != ConnectionState::Disconnected || self.transport.is_open() {
            self.transport.close();
        }
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected by request");
        }
        self.state = ConnectionState::Disconnected;
        self.status.report("Disconnected");
    }

    /// Pump transport events, then wake the retry task if it is due
    pub fn service(&mut self, now: Instant) {
        for event in self.transport.service_events() {
            match event {
                TransportEvent::Opened => self.on_transport_open(),
                TransportEvent::Error(reason) => self.on_transport_error(&reason, now),
                TransportEvent::Closed(code) => self.on_transport_closed(code, now),
                TransportEvent::Binary(data) => self.on_message(&data),
                TransportEvent::Text(text) => debug!("Ignoring text message: {}", text),
            }
        }
        self.poll_retry(now);
    }

    fn on_transport_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Stale open event while {}", self.state);
            return;
        }

        info!("WebSocket connected!");
        self.state = ConnectionState::Connected;
        self.status.report("Connected");

        if let Err(e) = self.transport.send_text(VIEWER_IDENT) {
            warn!("Failed to send identification: {}", e);
        }

        if self.retry.take().is_some() {
            debug!("Reconnect loop finished");
        }
    }

    pub fn on_transport_error(&mut self, reason: &str, now: Instant) {
        warn!("WebSocket error: {}", reason);
        self.state = ConnectionState::Disconnected;
        self.last_error = Some(reason.to_string());
        self.status.report(&format!("Error: {}", reason));
        self.schedule_retry(now);
    }

    pub fn on_transport_closed(&mut self, code: CloseCode, now: Instant) {
        info!("WebSocket closed: {}", code);
        self.state = ConnectionState::Disconnected;
        self.last_close = Some(code);
        self.status.report(&format!("Disconnected: {}", code));

        if !code.is_normal() {
            self.schedule_retry(now);
        }
    }

    pub fn on_message(&mut self, data: &[u8]) {
        if self.state != ConnectionState::Connected {
            warn!("Dropping {} byte message received while {}", data.len(), self.state);
            return;
        }

        match decode::decode_frame(data) {
            Ok(image) => {
                debug!(
                    "Frame received and displayed - Size: {} bytes, Resolution: {}x{}",
                    data.len(),
                    image.width(),
                    image.height()
                );
                self.display.set_image(image);
                self.frames_shown += 1;
            }
            Err(e) => {
                warn!("Failed to load image data ({} bytes): {}", data.len(), e);
                self.frames_rejected += 1;
            }
        }
    }

    fn schedule_retry(&mut self, now: Instant) {
        if self.retry.is_some() {
            return;
        }
        let next_wake = now + self.config.reconnect_delay;
        info!("Reconnecting in {:?}", self.config.reconnect_delay);
        self.retry = Some(RetryTask { next_wake });
    }

    /// One wake of the reconnect loop: re-dial only if still disconnected,
    /// finish once connected
    fn poll_retry(&mut self, now: Instant) {
        let due = match self.retry {
            Some(ref task) => now >= task.next_wake,
            None => return,
        };

        if self.state == ConnectionState::Connected {
            self.retry = None;
            return;
        }
        if !due {
            return;
        }

        if let Some(ref mut task) = self.retry {
            task.next_wake = now + self.config.reconnect_delay;
        }
        if self.state == ConnectionState::Disconnected {
            info!("Attempting to reconnect...");
            self.connect(now);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry.as_ref().map(|task| task.next_wake)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_close(&self) -> Option<CloseCode> {
        self.last_close
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::{dropped, StubTransport};
    use crate::viewer::decode::tests::sample_jpeg;
    use crate::viewer::headless::HeadlessSurface;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStatus(Vec<String>);

    impl StatusSink for RecordingStatus {
        fn report(&mut self, text: &str) {
            self.0.push(text.to_string());
        }
    }

    type TestClient = FeedClient<StubTransport, HeadlessSurface, RecordingStatus>;

    const DELAY: Duration = Duration::from_secs(5);

    fn client(stub: &StubTransport) -> TestClient {
        let config = ViewerConfig {
            server_uri: "ws://relay.test/".to_string(),
            reconnect_delay: DELAY,
            auto_connect: true,
            tick_interval: Duration::from_millis(16),
        };
        FeedClient::new(config, stub.clone(), HeadlessSurface::new(None), RecordingStatus::default())
    }

    fn connected_client(stub: &StubTransport, now: Instant) -> TestClient {
        stub.with(|s| s.open_on_connect = true);
        let mut client = client(stub);
        client.connect(now);
        client.service(now);
        assert_eq!(client.state(), ConnectionState::Connected);
        client
    }

    #[test]
    fn test_connect_open_sends_identification_once() {
        let stub = StubTransport::opening();
        let mut client = client(&stub);
        let t0 = Instant::now();

        client.connect(t0);
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.service(t0);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(stub.sent_text(), vec![VIEWER_IDENT.to_string()]);
        assert!(!client.retry_pending());

        // More ticks do not repeat the handshake
        client.service(t0 + Duration::from_secs(1));
        assert_eq!(stub.sent_text().len(), 1);
    }

    #[test]
    fn test_connect_is_noop_while_connecting_or_connected() {
        let stub = StubTransport::new();
        let mut client = client(&stub);
        let t0 = Instant::now();

        client.connect(t0);
        client.connect(t0);
        assert_eq!(stub.connect_count(), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);

        stub.push(TransportEvent::Opened);
        client.service(t0);
        client.connect(t0);
        assert_eq!(stub.connect_count(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!client.retry_pending());
    }

    #[test]
    fn test_connect_while_redialing_keeps_retry_schedule() {
        let stub = StubTransport::new();
        let mut client = client(&stub);
        let t0 = Instant::now();

        client.connect(t0);
        stub.push(TransportEvent::Error("connection refused".to_string()));
        client.service(t0);
        assert_eq!(client.next_retry_at(), Some(t0 + DELAY));

        // The wake re-dials and leaves the loop armed for the next interval
        client.service(t0 + DELAY);
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(stub.connect_count(), 2);
        let armed = client.next_retry_at();
        assert_eq!(armed, Some(t0 + DELAY * 2));

        client.connect(t0 + DELAY + Duration::from_millis(10));
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(stub.connect_count(), 2);
        assert_eq!(client.next_retry_at(), armed);
    }

    #[test]
    fn test_abnormal_close_schedules_one_retry_and_reconnects() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        stub.push(dropped());
        client.service(t0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.retry_pending());
        assert_eq!(client.next_retry_at(), Some(t0 + DELAY));
        assert_eq!(client.last_close(), Some(CloseCode::Abnormal(1006)));

        // Not due yet
        client.service(t0 + DELAY - Duration::from_millis(1));
        assert_eq!(stub.connect_count(), 1);

        client.service(t0 + DELAY);
        assert_eq!(stub.connect_count(), 2);

        // The stub opens immediately; the next tick completes the reconnect
        client.service(t0 + DELAY + Duration::from_millis(16));
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!client.retry_pending());
        assert_eq!(stub.sent_text().len(), 2);
    }

    #[test]
    fn test_normal_close_does_not_retry() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        stub.push(TransportEvent::Closed(CloseCode::Normal));
        client.service(t0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.retry_pending());

        client.service(t0 + DELAY * 4);
        assert_eq!(stub.connect_count(), 1);
    }

    #[test]
    fn test_error_schedules_retry_only_once() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.connect(t0);
        stub.push(TransportEvent::Error("connection refused".to_string()));
        client.service(t0);
        assert!(client.retry_pending());
        assert_eq!(client.last_error(), Some("connection refused"));

        // A second failure before the wake keeps the original schedule
        let later = t0 + Duration::from_secs(2);
        client.on_transport_error("reset", later);
        client.on_transport_closed(CloseCode::Abnormal(1011), later);
        assert_eq!(client.next_retry_at(), Some(t0 + DELAY));
    }

    #[test]
    fn test_retry_loop_keeps_trying_until_connected() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.connect(t0);
        stub.push(TransportEvent::Error("refused".to_string()));
        client.service(t0);

        // First wake: re-dial, fails again
        client.service(t0 + DELAY);
        assert_eq!(stub.connect_count(), 2);
        stub.push(TransportEvent::Error("refused".to_string()));
        client.service(t0 + DELAY);
        assert!(client.retry_pending());
        assert_eq!(client.next_retry_at(), Some(t0 + DELAY * 2));

        // Second wake: re-dial, succeeds
        client.service(t0 + DELAY * 2);
        assert_eq!(stub.connect_count(), 3);
        stub.push(TransportEvent::Opened);
        client.service(t0 + DELAY * 2);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!client.retry_pending());
    }

    #[test]
    fn test_wake_while_connecting_does_not_redial() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.connect(t0);
        stub.push(TransportEvent::Error("refused".to_string()));
        client.service(t0);
        client.service(t0 + DELAY);
        assert_eq!(client.state(), ConnectionState::Connecting);

        // Attempt still in flight at the next wake
        client.service(t0 + DELAY * 2);
        assert_eq!(stub.connect_count(), 2);
        assert!(client.retry_pending());
    }

    #[test]
    fn test_synchronous_connect_failure_schedules_retry() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        stub.with(|s| s.refuse_connect = Some("bad uri".to_string()));
        let mut client = client(&stub);

        client.connect(t0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.retry_pending());
        assert!(client.last_error().is_some());
        assert!(client
            .status
            .0
            .iter()
            .any(|s| s.starts_with("Connection failed")));
    }

    #[test]
    fn test_disconnect_cancels_retry() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        stub.push(dropped());
        client.service(t0);
        assert!(client.retry_pending());

        client.disconnect();
        assert!(!client.retry_pending());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        for i in 1..=5u32 {
            client.service(t0 + DELAY * i);
        }
        assert_eq!(stub.connect_count(), 1);
    }

    #[test]
    fn test_disconnect_while_connected_closes_transport() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        client.disconnect();
        assert_eq!(stub.with(|s| s.closes), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.status.0.last().map(String::as_str), Some("Disconnected"));

        client.service(t0 + DELAY * 3);
        assert_eq!(stub.connect_count(), 1);
    }

    #[test]
    fn test_disconnect_while_connecting_abandons_attempt() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.connect(t0);
        stub.push(TransportEvent::Opened);
        client.disconnect();
        assert_eq!(stub.with(|s| s.closes), 1);

        // An open that was already in flight is discarded by close()
        client.service(t0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_open_is_ignored() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        stub.push(TransportEvent::Opened);
        client.service(t0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(stub.sent_text().is_empty());
    }

    #[test]
    fn test_at_most_one_retry_over_event_sequences() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);

        let mut now = t0;
        for round in 0..60usize {
            match (round * 7 + round / 3) % 6 {
                0 => client.connect(now),
                1 => stub.push(TransportEvent::Error("x".to_string())),
                2 => stub.push(dropped()),
                3 => stub.push(TransportEvent::Opened),
                4 => stub.push(TransportEvent::Closed(CloseCode::Normal)),
                _ => client.disconnect(),
            }
            client.service(now);
            if client.state() == ConnectionState::Connected {
                assert!(!client.retry_pending());
            }
            if let Some(at) = client.next_retry_at() {
                assert!(at > now);
                assert!(at <= now + DELAY);
            }
            now += Duration::from_millis(700);
        }
    }

    #[test]
    fn test_good_frame_updates_display_once() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        stub.push(TransportEvent::Binary(sample_jpeg(160, 120, 40)));
        client.service(t0);

        assert_eq!(client.frames_shown(), 1);
        assert_eq!(client.display().updates(), 1);
        assert_eq!(client.display().current().map(|i| i.dimensions()), Some((160, 120)));
    }

    #[test]
    fn test_corrupt_frame_leaves_display_untouched() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = connected_client(&stub, t0);

        client.on_message(&sample_jpeg(32, 24, 100));
        let before = client.display().current().cloned();
        assert!(before.is_some());

        let mut corrupt = sample_jpeg(32, 24, 200);
        corrupt.truncate(12);
        client.on_message(&corrupt);

        assert_eq!(client.display().current().cloned(), before);
        assert_eq!(client.display().updates(), 1);
        assert_eq!(client.frames_rejected(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!client.retry_pending());
    }

    #[test]
    fn test_message_while_disconnected_is_dropped() {
        let stub = StubTransport::new();
        let mut client = client(&stub);

        client.on_message(&sample_jpeg(8, 8, 0));
        assert_eq!(client.display().updates(), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_start_honours_auto_connect() {
        let t0 = Instant::now();
        let stub = StubTransport::new();
        let mut client = client(&stub);
        client.start(t0);
        assert_eq!(stub.connect_count(), 1);

        let stub = StubTransport::new();
        let mut manual = FeedClient::new(
            ViewerConfig {
                auto_connect: false,
                ..ViewerConfig::default()
            },
            stub.clone(),
            HeadlessSurface::new(None),
            RecordingStatus::default(),
        );
        manual.start(t0);
        assert_eq!(stub.connect_count(), 0);
        assert_eq!(manual.state(), ConnectionState::Disconnected);
    }
}
