//! Realtime streaming client for the ProjectX Gateway API
//!
//! This crate maintains authenticated push connections to the Gateway's
//! market and user hubs, tracks per-contract and per-account subscriptions,
//! and transparently re-establishes subscription state after reconnects.
//!
//! Modules:
//! - `service`: composition root exposing the application-facing surface
//! - `hub`: per-hub connection lifecycle, subscription registry, dispatch
//! - `transport`: streaming transport trait and the WebSocket implementation
//! - `events`: typed payload models and the Gateway wire contract
//! - `auth`: session token provider trait
//! - `config`: endpoint and transport configuration

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod hub;
pub mod service;
pub mod transport;

pub use auth::{AuthError, StaticTokenProvider, TokenProvider};
pub use config::{RealtimeConfig, TransportOptions};
pub use errors::RealtimeError;
pub use events::{
    AccountUpdate, DecodeError, DepthLevel, OrderStatus, OrderUpdate, PositionType,
    PositionUpdate, QuoteUpdate, RealtimeEvent, Side, TradeUpdate, UserTradeUpdate,
};
pub use hub::{
    ConnectionState, EventCallback, HubConnection, HubKind, SubscriptionHandle, Topic,
};
pub use service::RealtimeService;
pub use transport::ws::WebSocketTransport;
pub use transport::{CloseEvent, StreamTransport, TransportError};
