use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::protocol::VIEWER_IDENT;

/// Frames queued per viewer before new ones are dropped
const VIEWER_QUEUE: usize = 4;

type ViewerMap = Arc<RwLock<HashMap<u64, mpsc::Sender<Vec<u8>>>>>;

/// Fans camera frames out to every identified viewer
/// - A connection is a camera source until it sends the viewer identifier
/// - Every binary message from a source goes to every viewer
/// - Nothing is stored; a slow viewer just misses frames
pub struct RelayServer {
    listener: TcpListener,
    viewers: ViewerMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Source,
    Viewer,
}

impl RelayServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind relay to {}", addr))?;
        Ok(Self {
            listener,
            viewers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!("📡 Relay listening on: {}", self.local_addr()?);

        let mut next_id = 0u64;
        loop {
            let (stream, peer) = self.listener.accept().await?;
            next_id += 1;
            let id = next_id;
            let viewers = self.viewers.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, id, viewers).await {
                    let err_str = e.to_string();
                    // Non-WebSocket probes (bots/scanners) are noise
                    if !err_str.contains("Connection: upgrade") && !err_str.contains("protocol error") {
                        warn!("Connection {} from {} failed: {}", id, peer, e);
                    }
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, id: u64, viewers: ViewerMap) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut role = Role::Source;

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(VIEWER_QUEUE);

    // Spawn task to push frames to this connection once it is a viewer
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(WsMessage::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) if text == VIEWER_IDENT && role == Role::Source => {
                role = Role::Viewer;
                let mut viewers_write = viewers.write().await;
                viewers_write.insert(id, tx.clone());
                info!("🖥️  Viewer {} joined ({} watching)", id, viewers_write.len());
            }
            Ok(WsMessage::Binary(data)) if role == Role::Source => {
                let viewers_read = viewers.read().await;
                for (viewer_id, viewer_tx) in viewers_read.iter() {
                    if viewer_tx.try_send(data.clone()).is_err() {
                        debug!("Viewer {} is behind, dropping frame", viewer_id);
                    }
                }
            }
            Ok(WsMessage::Text(text)) => debug!("Connection {} sent text: {}", id, text),
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if role == Role::Viewer {
        viewers.write().await.remove(&id);
        info!("🔌 Viewer {} left", id);
    } else {
        info!("🔌 Source {} disconnected", id);
    }

    send_task.abort();
    Ok(())
}

pub async fn start_relay(addr: String) -> Result<()> {
    let server = RelayServer::bind(&addr).await?;
    server.run().await
}
