//! Streaming transport abstraction for hub connections
//!
//! A transport owns one persistent bidirectional connection: it delivers
//! named server events to registered handlers, sends remote invocations, and
//! reconnects on its own according to [`TransportOptions`]. Hub lifecycle
//! logic is written against the [`StreamTransport`] trait so tests can script
//! a transport without any network.

pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Handler for a named server event; receives the raw invocation arguments.
pub type EventHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Handler invoked after every successful connect, including reconnects.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;

/// Handler invoked when the connection drops or is closed.
pub type CloseHandler = Arc<dyn Fn(CloseEvent) + Send + Sync>;

/// Connection-loss notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseEvent {
    /// Whether the transport will keep retrying on its own. `false` means
    /// the close is final: either requested or retries are exhausted.
    pub retrying: bool,
}

#[derive(Error, Debug)]
pub enum TransportError {
    /// The server rejected the connection handshake.
    #[error("handshake rejected with HTTP status {status}")]
    Handshake { status: u16 },
    /// The connection attempt failed below the HTTP layer.
    #[error("connection failed: {0}")]
    Connect(String),
    /// No active connection to send on.
    #[error("transport is not connected")]
    NotConnected,
    /// An outbound frame could not be written.
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl TransportError {
    /// True when the handshake was rejected for a stale or invalid token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Handshake { status: 401 })
    }
}

/// Persistent bidirectional streaming connection primitive.
///
/// Handlers must be registered before `connect` so no event races the
/// registration; implementations replace the handler when the same event
/// name is registered twice.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens the connection and returns once the handshake completes.
    ///
    /// After the first successful connect the transport reconnects on its
    /// own; an initial handshake failure is surfaced here without retries so
    /// the caller can decide (e.g. refresh a token and try again).
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Closes the connection and stops any reconnect attempts.
    async fn close(&self);

    /// Sends a remote invocation on the active connection.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError>;

    /// Registers the handler for a named server event.
    fn on_event(&self, name: &str, handler: EventHandler);

    /// Registers a connection-opened handler.
    fn on_open(&self, handler: OpenHandler);

    /// Registers a connection-closed handler.
    fn on_close(&self, handler: CloseHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_detection() {
        assert!(TransportError::Handshake { status: 401 }.is_unauthorized());
        assert!(!TransportError::Handshake { status: 503 }.is_unauthorized());
        assert!(!TransportError::NotConnected.is_unauthorized());
    }
}
