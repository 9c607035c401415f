//! WebSocket transport backed by tokio-tungstenite.
//!
//! The socket lives in a background task. The owning loop talks to it through
//! channels: commands and frames out, events in. The frame channel is bounded
//! so a stalled uplink pushes back on the sender instead of queueing frames.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Transport, TransportError, TransportEvent};
use crate::protocol::{self, CloseCode};

/// Close code reported when the stream ends without a close frame
const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported for a close frame with no status
const CLOSE_NO_STATUS: u16 = 1005;
/// Binary messages waiting for the socket before `send_binary` reports busy
const FRAME_QUEUE: usize = 2;
/// How long a closing worker gets to finish the handshake
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum Command {
    Text(String),
    Close,
}

enum SessionEnd {
    LocalClose,
    RemoteClose(CloseCode),
    Failed(String),
}

pub struct WsTransport {
    /// Redial interval after a drop. `None` leaves reconnection to the owner.
    reconnect_interval: Option<Duration>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
    frame_tx: Option<mpsc::Sender<Vec<u8>>>,
    open: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Transport that reports drops and stays down
    pub fn new() -> Self {
        Self {
            reconnect_interval: None,
            events_rx: None,
            command_tx: None,
            frame_tx: None,
            open: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Transport that keeps redialling at a fixed interval until closed
    pub fn with_reconnect(interval: Duration) -> Self {
        let mut transport = Self::new();
        transport.reconnect_interval = Some(interval);
        transport
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.open.store(false, Ordering::Relaxed);
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, uri: &str) -> Result<(), TransportError> {
        let endpoint = protocol::validate_endpoint(uri).map_err(TransportError::InvalidEndpoint)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        // A fresh attempt replaces whatever was running before
        self.stop_worker();
        debug!("Opening {} (tls: {})", uri, protocol::is_secure(&endpoint));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let open = Arc::new(AtomicBool::new(false));

        self.worker = Some(runtime.spawn(run_worker(
            uri.to_string(),
            self.reconnect_interval,
            events_tx,
            Outbound {
                commands: command_rx,
                frames: frame_rx,
            },
            open.clone(),
        )));
        self.events_rx = Some(events_rx);
        self.command_tx = Some(command_tx);
        self.frame_tx = Some(frame_tx);
        self.open = open;
        Ok(())
    }

    fn close(&mut self) {
        self.events_rx = None;
        self.frame_tx = None;
        match (self.command_tx.take(), tokio::runtime::Handle::try_current()) {
            // Let the worker finish the close handshake, but not forever:
            // a write stuck on a peer that stopped reading never returns
            (Some(tx), Ok(runtime)) if self.is_open() => {
                let _ = tx.send(Command::Close);
                if let Some(worker) = self.worker.take() {
                    runtime.spawn(async move {
                        tokio::time::sleep(CLOSE_GRACE).await;
                        worker.abort();
                    });
                }
                self.open.store(false, Ordering::Relaxed);
            }
            _ => self.stop_worker(),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let tx = self.command_tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Command::Text(text.to_string()))
            .map_err(|_| TransportError::WorkerGone)
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let tx = self.frame_tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.try_send(data.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Busy,
            TrySendError::Closed(_) => TransportError::WorkerGone,
        })
    }

    fn service_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if let Some(rx) = self.events_rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        events
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Receiving ends of everything the owner sends to the worker
struct Outbound {
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::Receiver<Vec<u8>>,
}

async fn run_worker(
    uri: String,
    reconnect_interval: Option<Duration>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: Outbound,
    open: Arc<AtomicBool>,
) {
    loop {
        debug!("Dialing {}", uri);
        match connect_async(uri.as_str()).await {
            Ok((ws_stream, _)) => {
                open.store(true, Ordering::Relaxed);
                let _ = events_tx.send(TransportEvent::Opened);

                let end = run_session(ws_stream, &events_tx, &mut outbound).await;
                open.store(false, Ordering::Relaxed);

                match end {
                    SessionEnd::LocalClose => {
                        let _ = events_tx.send(TransportEvent::Closed(CloseCode::Normal));
                        return;
                    }
                    SessionEnd::RemoteClose(code) => {
                        let _ = events_tx.send(TransportEvent::Closed(code));
                    }
                    SessionEnd::Failed(reason) => {
                        let _ = events_tx.send(TransportEvent::Error(reason));
                    }
                }
            }
            Err(e) => {
                let _ = events_tx.send(TransportEvent::Error(e.to_string()));
            }
        }

        let Some(interval) = reconnect_interval else {
            return;
        };

        info!("Reconnecting to {} in {:?}", uri, interval);
        let deadline = Instant::now() + interval;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                command = outbound.commands.recv() => match command {
                    Some(Command::Close) | None => return,
                    // Nothing to send on while the link is down
                    Some(_) => continue,
                },
                // Frames queued just before the drop are stale
                Some(_) = outbound.frames.recv() => continue,
            }
        }
    }
}

async fn run_session(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    outbound: &mut Outbound,
) -> SessionEnd {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Binary(data))) => {
                    let _ = events_tx.send(TransportEvent::Binary(data));
                }
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events_tx.send(TransportEvent::Text(text));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_NO_STATUS);
                    return SessionEnd::RemoteClose(CloseCode::from(code));
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                None => return SessionEnd::RemoteClose(CloseCode::Abnormal(CLOSE_ABNORMAL)),
            },
            // The next frame is only taken once the previous write finished
            Some(frame) = outbound.frames.recv() => {
                if let Err(e) = ws_sender.send(WsMessage::Binary(frame)).await {
                    return SessionEnd::Failed(format!("send failed: {}", e));
                }
            }
            command = outbound.commands.recv() => {
                let message = match command {
                    Some(Command::Text(text)) => WsMessage::Text(text),
                    Some(Command::Close) | None => {
                        let frame = CloseFrame {
                            code: WsCloseCode::Normal,
                            reason: "".into(),
                        };
                        if let Err(e) = ws_sender.send(WsMessage::Close(Some(frame))).await {
                            warn!("Close handshake failed: {}", e);
                        }
                        return SessionEnd::LocalClose;
                    }
                };
                if let Err(e) = ws_sender.send(message).await {
                    return SessionEnd::Failed(format!("send failed: {}", e));
                }
            }
        }
    }
}
