//! Composition root for the realtime layer

use std::sync::Arc;

use tracing::info;

use crate::auth::TokenProvider;
use crate::config::RealtimeConfig;
use crate::errors::RealtimeError;
use crate::events::{
    AccountUpdate, DepthLevel, OrderUpdate, PositionUpdate, QuoteUpdate, RealtimeEvent,
    TradeUpdate, UserTradeUpdate,
};
use crate::hub::{
    ConnectionState, EventCallback, HubConnection, HubKind, SubscriptionHandle, Topic,
};
use crate::transport::ws::WebSocketTransport;
use crate::transport::StreamTransport;

/// Realtime service owning the market and user hub connections.
///
/// Translates domain parameters (contract ids, account ids) into topics and
/// delegates to the owning hub. Subscriptions can be registered before
/// `start()`; they are issued once the hub connects.
pub struct RealtimeService {
    market: Arc<HubConnection>,
    user: Arc<HubConnection>,
}

impl RealtimeService {
    /// Creates a service with WebSocket transports built from `config`.
    pub fn new(token_provider: Arc<dyn TokenProvider>, config: RealtimeConfig) -> Self {
        let market_transport: Arc<dyn StreamTransport> =
            Arc::new(WebSocketTransport::new(config.transport.clone()));
        let user_transport: Arc<dyn StreamTransport> =
            Arc::new(WebSocketTransport::new(config.transport.clone()));
        Self::with_transports(token_provider, config, market_transport, user_transport)
    }

    /// Creates a service over caller-supplied transports.
    pub fn with_transports(
        token_provider: Arc<dyn TokenProvider>,
        config: RealtimeConfig,
        market_transport: Arc<dyn StreamTransport>,
        user_transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let market = HubConnection::new(
            HubKind::Market,
            config.market_hub_url.clone(),
            Arc::clone(&token_provider),
            market_transport,
        );
        let user = HubConnection::new(
            HubKind::User,
            config.user_hub_url.clone(),
            token_provider,
            user_transport,
        );
        Self { market, user }
    }

    /// Starts both hub connections; fails if either handshake fails.
    pub async fn start(&self) -> Result<(), RealtimeError> {
        info!("Starting realtime service");
        tokio::try_join!(self.market.start(), self.user.start())?;
        Ok(())
    }

    /// Stops both hub connections; recorded subscriptions are kept.
    pub async fn stop(&self) {
        info!("Stopping realtime service");
        tokio::join!(self.market.stop(), self.user.stop());
    }

    /// Registers a connection-state observer on both hubs.
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(HubKind, ConnectionState) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for hub in [&self.market, &self.user] {
            let handler = Arc::clone(&handler);
            let kind = hub.kind();
            hub.on_state_change(move |state| handler(kind, state));
        }
    }

    pub fn market_state(&self) -> ConnectionState {
        self.market.state()
    }

    pub fn user_state(&self) -> ConnectionState {
        self.user.state()
    }

    /// The market hub connection, for direct invocations and raw topics.
    pub fn market_hub(&self) -> &Arc<HubConnection> {
        &self.market
    }

    /// The user hub connection, for direct invocations and raw topics.
    pub fn user_hub(&self) -> &Arc<HubConnection> {
        &self.user
    }

    /// Subscribes to top-of-book quotes for a contract.
    pub async fn subscribe_quotes<F>(
        &self,
        contract_id: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&str, &QuoteUpdate) + Send + Sync + 'static,
    {
        let topic = Topic::Quotes {
            contract_id: contract_id.into(),
        };
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Quote { contract_id, quote } = event {
                callback(contract_id, quote);
            }
        });
        self.market.subscribe(topic, callback).await
    }

    /// Subscribes to executed trades for a contract.
    pub async fn subscribe_trades<F>(
        &self,
        contract_id: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&str, &[TradeUpdate]) + Send + Sync + 'static,
    {
        let topic = Topic::Trades {
            contract_id: contract_id.into(),
        };
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Trades {
                contract_id,
                trades,
            } = event
            {
                callback(contract_id, trades);
            }
        });
        self.market.subscribe(topic, callback).await
    }

    /// Subscribes to market depth updates for a contract.
    pub async fn subscribe_market_depth<F>(
        &self,
        contract_id: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&str, &[DepthLevel]) + Send + Sync + 'static,
    {
        let topic = Topic::Depth {
            contract_id: contract_id.into(),
        };
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Depth {
                contract_id,
                levels,
            } = event
            {
                callback(contract_id, levels);
            }
        });
        self.market.subscribe(topic, callback).await
    }

    /// Subscribes to account updates for the session.
    pub async fn subscribe_accounts<F>(
        &self,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&AccountUpdate) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Account { account } = event {
                callback(account);
            }
        });
        self.user.subscribe(Topic::Accounts, callback).await
    }

    /// Subscribes to order updates for an account.
    pub async fn subscribe_orders<F>(
        &self,
        account_id: i64,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&OrderUpdate) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Order { order } = event {
                callback(order);
            }
        });
        self.user
            .subscribe(Topic::Orders { account_id }, callback)
            .await
    }

    /// Subscribes to position updates for an account.
    pub async fn subscribe_positions<F>(
        &self,
        account_id: i64,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&PositionUpdate) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::Position { position } = event {
                callback(position);
            }
        });
        self.user
            .subscribe(Topic::Positions { account_id }, callback)
            .await
    }

    /// Subscribes to the user's fills for an account.
    pub async fn subscribe_user_trades<F>(
        &self,
        account_id: i64,
        callback: F,
    ) -> Result<SubscriptionHandle, RealtimeError>
    where
        F: Fn(&UserTradeUpdate) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            if let RealtimeEvent::UserTrade { trade } = event {
                callback(trade);
            }
        });
        self.user
            .subscribe(Topic::UserTrades { account_id }, callback)
            .await
    }

    /// Removes the callback identified by `handle` from its owning hub.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), RealtimeError> {
        match handle.topic().hub() {
            HubKind::Market => self.market.unsubscribe(handle).await,
            HubKind::User => self.user.unsubscribe(handle).await,
        }
    }
}
