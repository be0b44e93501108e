//! Per-hub connection lifecycle, subscription tracking, and event dispatch
//!
//! This module provides:
//! - Connection state machine with observer notifications
//! - Subscription registry that replays itself after every reconnect
//! - Event dispatcher with per-callback fault isolation

pub mod connection;
mod dispatch;
pub mod registry;

pub use connection::{ConnectionState, HubConnection, HubKind};
pub use registry::{EventCallback, SubscriptionHandle, Topic};
