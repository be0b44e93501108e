//! Crate-level error type for the realtime layer

use thiserror::Error;

use crate::auth::AuthError;
use crate::events::DecodeError;
use crate::hub::ConnectionState;
use crate::transport::TransportError;

/// Errors surfaced by the realtime service and hub connections.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Token acquisition or refresh failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// The transport handshake failed while starting a hub connection.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A remote invocation was attempted while the hub was not connected.
    #[error("hub is not connected (state: {0})")]
    NotConnected(ConnectionState),
    /// A remote call failed on an established connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// An inbound event payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}
