//! Message-oriented socket abstraction shared by the camera and the viewer.
//!
//! A transport never calls back into its owner. Lifecycle changes and inbound
//! messages are queued and handed out by [`Transport::service_events`], which
//! the owner pumps once per tick.

pub mod ws;

#[cfg(test)]
pub(crate) mod stub;

use thiserror::Error;

use crate::protocol::CloseCode;

/// Something that happened on the socket since the last `service_events` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Opened,
    /// Connection attempt or live connection failed
    Error(String),
    /// Connection closed with the given code
    Closed(CloseCode),
    /// One binary message (one frame)
    Binary(Vec<u8>),
    /// One text message
    Text(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("no async runtime available to drive the socket")]
    NoRuntime,
    #[error("not connected")]
    NotConnected,
    #[error("uplink busy, previous frames not yet written")]
    Busy,
    #[error("connection worker has stopped")]
    WorkerGone,
}

/// Persistent bidirectional socket carrying text and binary messages
pub trait Transport {
    /// Start opening a connection. Completion is reported later as
    /// `Opened` or `Error` through `service_events`. An `Err` here means the
    /// attempt could not even be started.
    fn connect(&mut self, uri: &str) -> Result<(), TransportError>;

    /// Close the connection with the normal close code, or abandon a
    /// pending attempt. Events queued before the call are discarded.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Drain every event queued since the previous call
    fn service_events(&mut self) -> Vec<TransportEvent>;
}
