//! Hub connection lifecycle and state machine

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::dispatch::EventDispatcher;
use super::registry::{EventCallback, SubscriptionHandle, SubscriptionRegistry, Topic};
use crate::auth::TokenProvider;
use crate::errors::RealtimeError;
use crate::transport::{CloseEvent, StreamTransport};

/// Which Gateway hub a connection is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubKind {
    /// Market data: quotes, trades, depth
    Market,
    /// Account data: accounts, orders, positions, fills
    User,
}

impl fmt::Display for HubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubKind::Market => write!(f, "market"),
            HubKind::User => write!(f, "user"),
        }
    }
}

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted
    Disconnected,
    /// Initial connection attempt in progress
    Connecting,
    /// Connected and able to invoke remote methods
    Connected,
    /// Connection lost, transport is retrying
    Reconnecting,
    /// Explicitly stopped, no auto-reconnect
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Connection-state observer
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// One authenticated streaming connection to a Gateway hub.
///
/// Owns the transport and the connection state; recorded subscriptions are
/// replayed on every transition into [`ConnectionState::Connected`], so a
/// logical subscription survives reconnects and a stop/start cycle.
pub struct HubConnection {
    kind: HubKind,
    hub_url: String,
    token_provider: Arc<dyn TokenProvider>,
    transport: Arc<dyn StreamTransport>,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    state: Mutex<ConnectionState>,
    observers: Mutex<Vec<StateHandler>>,
    /// Serializes state transitions and observer notification so observers
    /// see transitions in the order they occur, never concurrently.
    notify_gate: Mutex<()>,
}

impl HubConnection {
    /// Creates a hub connection and wires it to the transport's open, close,
    /// and event notifications.
    pub fn new(
        kind: HubKind,
        hub_url: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        transport: Arc<dyn StreamTransport>,
    ) -> Arc<Self> {
        let hub = Arc::new(Self {
            kind,
            hub_url: hub_url.into(),
            token_provider,
            transport,
            registry: SubscriptionRegistry::new(kind),
            dispatcher: EventDispatcher::new(kind),
            state: Mutex::new(ConnectionState::Disconnected),
            observers: Mutex::new(Vec::new()),
            notify_gate: Mutex::new(()),
        });

        wire_transport(&hub);
        EventDispatcher::attach(&hub);
        hub
    }

    pub fn kind(&self) -> HubKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub(crate) fn transport(&self) -> &Arc<dyn StreamTransport> {
        &self.transport
    }

    /// Number of currently recorded topics.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a connection-state observer.
    ///
    /// Observers are invoked in registration order for every transition.
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Starts the hub connection.
    ///
    /// Idempotent: a no-op while connecting, connected, or reconnecting.
    /// Embeds a freshly fetched token in the hub URL; a 401 handshake
    /// rejection triggers exactly one token refresh and one retried connect
    /// before the failure is surfaced.
    pub async fn start(&self) -> Result<(), RealtimeError> {
        let started = self.transition_if(
            |state| {
                matches!(
                    state,
                    ConnectionState::Disconnected | ConnectionState::Stopped
                )
            },
            ConnectionState::Connecting,
        );
        if !started {
            debug!(hub = %self.kind, "Hub connection already started");
            return Ok(());
        }
        info!(hub = %self.kind, "Starting hub connection");

        let token = match self.token_provider.get_token().await {
            Ok(token) => token,
            Err(err) => {
                self.transition(ConnectionState::Disconnected);
                return Err(err.into());
            }
        };
        let url = match build_hub_url(&self.hub_url, &token) {
            Ok(url) => url,
            Err(err) => {
                self.transition(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        match self.transport.connect(&url).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unauthorized() => {
                info!(hub = %self.kind, "Hub rejected token, refreshing and retrying once");
                let token = match self.token_provider.refresh_token().await {
                    Ok(token) => token,
                    Err(err) => {
                        self.transition(ConnectionState::Disconnected);
                        return Err(err.into());
                    }
                };
                let url = match build_hub_url(&self.hub_url, &token) {
                    Ok(url) => url,
                    Err(err) => {
                        self.transition(ConnectionState::Disconnected);
                        return Err(err);
                    }
                };
                match self.transport.connect(&url).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        self.transition(ConnectionState::Disconnected);
                        Err(RealtimeError::Connection(err.to_string()))
                    }
                }
            }
            Err(err) => {
                self.transition(ConnectionState::Disconnected);
                Err(RealtimeError::Connection(err.to_string()))
            }
        }
    }

    /// Stops the hub connection.
    ///
    /// Idempotent. Recorded subscriptions are kept for a future `start()`.
    pub async fn stop(&self) {
        if self.state() == ConnectionState::Stopped {
            debug!(hub = %self.kind, "Hub connection already stopped");
            return;
        }
        info!(hub = %self.kind, "Stopping hub connection");
        self.transition(ConnectionState::Stopped);
        self.transport.close().await;
    }

    /// Sends a remote invocation; only valid while connected.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<(), RealtimeError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected(state));
        }
        self.transport.invoke(method, args).await?;
        Ok(())
    }

    /// Registers `callback` under `topic`.
    ///
    /// The first callback for a topic triggers the remote subscribe when
    /// connected; otherwise it is deferred to the next reconnect replay.
    pub async fn subscribe(
        &self,
        topic: Topic,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, RealtimeError> {
        self.registry.subscribe(self, topic, callback).await
    }

    /// Removes the callback identified by `handle`.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), RealtimeError> {
        self.registry.unsubscribe(self, handle).await
    }

    /// Applies a state transition and notifies observers in order.
    fn transition(&self, next: ConnectionState) {
        self.transition_if(|_| true, next);
    }

    /// Atomically applies a transition when `allowed` holds for the current
    /// state. Returns whether the transition happened.
    fn transition_if<F>(&self, allowed: F, next: ConnectionState) -> bool
    where
        F: FnOnce(ConnectionState) -> bool,
    {
        let _gate = self
            .notify_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == next || !allowed(*state) {
                return false;
            }
            let previous = *state;
            *state = next;
            previous
        };
        debug!(hub = %self.kind, from = %previous, to = %next, "Connection state changed");

        let observers: Vec<StateHandler> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        for observer in observers {
            observer(next);
        }
        true
    }

    /// Transport reported an established connection (initial or reconnect).
    fn handle_open(self: Arc<Self>) {
        info!(hub = %self.kind, "Hub connection established");
        self.transition(ConnectionState::Connected);

        // Replay runs on its own task; the transport's delivery context must
        // not block on the replay invocations.
        let hub = Arc::clone(&self);
        tokio::spawn(async move {
            hub.registry.on_reconnected(&hub).await;
        });
    }

    /// Transport reported a lost or closed connection.
    fn handle_close(self: Arc<Self>, event: CloseEvent) {
        if self.state() == ConnectionState::Stopped {
            return;
        }
        if event.retrying {
            self.transition(ConnectionState::Reconnecting);
        } else {
            warn!(hub = %self.kind, "Connection lost, transport gave up retrying");
            self.transition(ConnectionState::Disconnected);
        }
    }
}

fn wire_transport(hub: &Arc<HubConnection>) {
    let weak = Arc::downgrade(hub);
    hub.transport.on_open(Arc::new(move || {
        if let Some(hub) = weak.upgrade() {
            hub.handle_open();
        }
    }));

    let weak = Arc::downgrade(hub);
    hub.transport.on_close(Arc::new(move |event| {
        if let Some(hub) = weak.upgrade() {
            hub.handle_close(event);
        }
    }));
}

fn build_hub_url(base: &str, token: &str) -> Result<String, RealtimeError> {
    let mut url = Url::parse(base)
        .map_err(|e| RealtimeError::Connection(format!("invalid hub url {}: {}", base, e)))?;
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url.into())
}
