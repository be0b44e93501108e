//! Subscription registry: the record of what should currently be subscribed

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{ConnectionState, HubConnection, HubKind};
use crate::errors::RealtimeError;
use crate::events;
use crate::events::RealtimeEvent;

/// One thing the application wants pushed to it.
///
/// A topic knows which hub serves it and the remote method names and
/// arguments used to subscribe and unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Quotes for a contract
    Quotes { contract_id: String },
    /// Executed trades for a contract
    Trades { contract_id: String },
    /// Market depth for a contract
    Depth { contract_id: String },
    /// Updates for all accounts of the session
    Accounts,
    /// Order updates for an account
    Orders { account_id: i64 },
    /// Position updates for an account
    Positions { account_id: i64 },
    /// Fills for an account
    UserTrades { account_id: i64 },
}

impl Topic {
    /// The hub that serves this topic.
    pub fn hub(&self) -> HubKind {
        match self {
            Topic::Quotes { .. } | Topic::Trades { .. } | Topic::Depth { .. } => HubKind::Market,
            Topic::Accounts
            | Topic::Orders { .. }
            | Topic::Positions { .. }
            | Topic::UserTrades { .. } => HubKind::User,
        }
    }

    pub(crate) fn subscribe_method(&self) -> &'static str {
        match self {
            Topic::Quotes { .. } => events::METHOD_SUBSCRIBE_QUOTES,
            Topic::Trades { .. } => events::METHOD_SUBSCRIBE_TRADES,
            Topic::Depth { .. } => events::METHOD_SUBSCRIBE_DEPTH,
            Topic::Accounts => events::METHOD_SUBSCRIBE_ACCOUNTS,
            Topic::Orders { .. } => events::METHOD_SUBSCRIBE_ORDERS,
            Topic::Positions { .. } => events::METHOD_SUBSCRIBE_POSITIONS,
            Topic::UserTrades { .. } => events::METHOD_SUBSCRIBE_USER_TRADES,
        }
    }

    pub(crate) fn unsubscribe_method(&self) -> &'static str {
        match self {
            Topic::Quotes { .. } => events::METHOD_UNSUBSCRIBE_QUOTES,
            Topic::Trades { .. } => events::METHOD_UNSUBSCRIBE_TRADES,
            Topic::Depth { .. } => events::METHOD_UNSUBSCRIBE_DEPTH,
            Topic::Accounts => events::METHOD_UNSUBSCRIBE_ACCOUNTS,
            Topic::Orders { .. } => events::METHOD_UNSUBSCRIBE_ORDERS,
            Topic::Positions { .. } => events::METHOD_UNSUBSCRIBE_POSITIONS,
            Topic::UserTrades { .. } => events::METHOD_UNSUBSCRIBE_USER_TRADES,
        }
    }

    pub(crate) fn args(&self) -> Vec<Value> {
        match self {
            Topic::Quotes { contract_id }
            | Topic::Trades { contract_id }
            | Topic::Depth { contract_id } => vec![Value::String(contract_id.clone())],
            Topic::Accounts => vec![],
            Topic::Orders { account_id }
            | Topic::Positions { account_id }
            | Topic::UserTrades { account_id } => vec![Value::from(*account_id)],
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Quotes { contract_id } => write!(f, "quotes:{}", contract_id),
            Topic::Trades { contract_id } => write!(f, "trades:{}", contract_id),
            Topic::Depth { contract_id } => write!(f, "depth:{}", contract_id),
            Topic::Accounts => write!(f, "accounts"),
            Topic::Orders { account_id } => write!(f, "orders:{}", account_id),
            Topic::Positions { account_id } => write!(f, "positions:{}", account_id),
            Topic::UserTrades { account_id } => write!(f, "user-trades:{}", account_id),
        }
    }
}

/// Callback invoked with every decoded event for a subscribed topic.
pub type EventCallback = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Identifies exactly one registered callback; used only to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: Uuid,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

struct RegisteredCallback {
    id: Uuid,
    callback: EventCallback,
}

struct TopicEntry {
    topic: Topic,
    callbacks: Vec<RegisteredCallback>,
}

/// Authoritative record of what should currently be subscribed on one hub.
///
/// Entries keep first-subscription order so reconnect replay is
/// deterministic. Topics with no callbacks are removed, never tombstoned.
pub(crate) struct SubscriptionRegistry {
    kind: HubKind,
    entries: Mutex<Vec<TopicEntry>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(kind: HubKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Registers `callback` under `topic`.
    ///
    /// The first callback for a topic triggers the remote subscribe when the
    /// hub is connected; otherwise the call is deferred to the next replay.
    /// Later callbacks only grow the list, no second remote call is made.
    pub(crate) async fn subscribe(
        &self,
        hub: &HubConnection,
        topic: Topic,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, RealtimeError> {
        let id = Uuid::new_v4();
        let first = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.iter_mut().find(|entry| entry.topic == topic) {
                Some(entry) => {
                    entry.callbacks.push(RegisteredCallback { id, callback });
                    false
                }
                None => {
                    entries.push(TopicEntry {
                        topic: topic.clone(),
                        callbacks: vec![RegisteredCallback { id, callback }],
                    });
                    true
                }
            }
        };

        if first && hub.state() == ConnectionState::Connected {
            match hub.invoke(topic.subscribe_method(), topic.args()).await {
                Ok(()) => debug!(hub = %self.kind, topic = %topic, "Remote subscribe sent"),
                Err(RealtimeError::NotConnected(state)) => {
                    // Lost the connection since the state check; the replay
                    // on the next reconnect picks this topic up.
                    debug!(hub = %self.kind, topic = %topic, state = %state,
                        "Deferring remote subscribe to reconnect replay");
                }
                Err(err) => {
                    warn!(hub = %self.kind, topic = %topic, error = %err, "Remote subscribe failed");
                    return Err(err);
                }
            }
        }

        Ok(SubscriptionHandle { topic, id })
    }

    /// Removes the callback identified by `handle`.
    ///
    /// When the topic's callback list empties, the topic is dropped and the
    /// remote unsubscribe is issued best-effort: local removal always
    /// completes, a remote failure is reported but never retried.
    pub(crate) async fn unsubscribe(
        &self,
        hub: &HubConnection,
        handle: &SubscriptionHandle,
    ) -> Result<(), RealtimeError> {
        let emptied = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(pos) = entries
                .iter()
                .position(|entry| entry.topic == handle.topic)
            else {
                debug!(hub = %self.kind, topic = %handle.topic, "Unsubscribe for unknown topic, ignoring");
                return Ok(());
            };
            let entry = &mut entries[pos];
            let before = entry.callbacks.len();
            entry.callbacks.retain(|registered| registered.id != handle.id);
            if entry.callbacks.len() == before {
                debug!(hub = %self.kind, topic = %handle.topic, "Stale subscription handle, ignoring");
                return Ok(());
            }
            if entry.callbacks.is_empty() {
                entries.remove(pos);
                true
            } else {
                false
            }
        };

        if emptied && hub.state() == ConnectionState::Connected {
            if let Err(err) = hub
                .invoke(handle.topic.unsubscribe_method(), handle.topic.args())
                .await
            {
                warn!(hub = %self.kind, topic = %handle.topic, error = %err,
                    "Remote unsubscribe failed, subscription removed locally");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Re-issues the remote subscribe for every recorded topic.
    ///
    /// Called after every transition into connected. Topics are replayed
    /// sequentially in first-subscription order; a failed topic is logged
    /// and replay continues with the next one.
    pub(crate) async fn on_reconnected(&self, hub: &HubConnection) {
        let topics = self.topics();
        if topics.is_empty() {
            return;
        }

        info!(hub = %self.kind, count = topics.len(), "Replaying subscriptions");
        for topic in topics {
            match hub.invoke(topic.subscribe_method(), topic.args()).await {
                Ok(()) => debug!(hub = %self.kind, topic = %topic, "Replayed subscription"),
                Err(err) => {
                    warn!(hub = %self.kind, topic = %topic, error = %err,
                        "Failed to replay subscription, continuing with next topic");
                }
            }
        }
    }

    /// Snapshot of recorded topics in first-subscription order.
    pub(crate) fn topics(&self) -> Vec<Topic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.topic.clone())
            .collect()
    }

    /// Snapshot of the callbacks registered for `topic`, in registration
    /// order. Cloned out so dispatch never runs under the registry lock.
    pub(crate) fn callbacks_for(&self, topic: &Topic) -> Vec<(Uuid, EventCallback)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.topic == *topic)
            .map(|entry| {
                entry
                    .callbacks
                    .iter()
                    .map(|registered| (registered.id, Arc::clone(&registered.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_routing() {
        let quotes = Topic::Quotes {
            contract_id: "CON.F.US.ENQ.H25".to_string(),
        };
        assert_eq!(quotes.hub(), HubKind::Market);
        assert_eq!(quotes.subscribe_method(), "SubscribeContractQuotes");
        assert_eq!(quotes.unsubscribe_method(), "UnsubscribeContractQuotes");
        assert_eq!(quotes.args(), vec![json!("CON.F.US.ENQ.H25")]);

        let orders = Topic::Orders { account_id: 123 };
        assert_eq!(orders.hub(), HubKind::User);
        assert_eq!(orders.subscribe_method(), "SubscribeOrders");
        assert_eq!(orders.args(), vec![json!(123)]);

        assert_eq!(Topic::Accounts.args(), Vec::<Value>::new());
    }

    #[test]
    fn test_topic_equality() {
        let a = Topic::Quotes {
            contract_id: "CON.F.US.ENQ.H25".to_string(),
        };
        let b = Topic::Quotes {
            contract_id: "CON.F.US.ENQ.H25".to_string(),
        };
        let c = Topic::Trades {
            contract_id: "CON.F.US.ENQ.H25".to_string(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
