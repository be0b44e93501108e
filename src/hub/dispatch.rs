//! Decodes inbound hub events and routes them to subscribed callbacks

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use serde::de::DeserializeOwned;
use tracing::{error, trace, warn};

use super::connection::{HubConnection, HubKind};
use super::registry::Topic;
use crate::events::{
    self, AccountUpdate, DecodeError, DepthLevel, OrderUpdate, PositionUpdate, QuoteUpdate,
    RealtimeEvent, TradeUpdate, UserTradeUpdate,
};

/// Routes decoded events to the registry's callbacks for one hub.
///
/// Exactly one transport handler is registered per server event name. Decode
/// failures drop the event; a panicking callback never prevents the
/// remaining callbacks from running.
pub(crate) struct EventDispatcher {
    kind: HubKind,
}

impl EventDispatcher {
    pub(crate) fn new(kind: HubKind) -> Self {
        Self { kind }
    }

    /// Registers one transport handler per event name pushed by this hub.
    pub(crate) fn attach(hub: &Arc<HubConnection>) {
        for &name in events::event_names(hub.kind()) {
            let weak = Arc::downgrade(hub);
            hub.transport().on_event(
                name,
                Arc::new(move |args| {
                    if let Some(hub) = weak.upgrade() {
                        hub.dispatcher().handle_raw(&hub, name, &args);
                    }
                }),
            );
        }
    }

    /// Decodes a raw hub push and dispatches it; never propagates a failure.
    pub(crate) fn handle_raw(&self, hub: &HubConnection, event: &str, args: &[Value]) {
        let (topic, decoded) = match decode(self.kind, event, args) {
            Ok(decoded) => decoded,
            Err(DecodeError::UnknownEvent(name)) => {
                warn!(hub = %self.kind, event = %name, "Ignoring unknown event");
                return;
            }
            Err(err) => {
                warn!(hub = %self.kind, event = %event, error = %err, "Dropping undecodable event");
                return;
            }
        };
        self.dispatch(hub, &topic, &decoded);
    }

    /// Invokes every callback registered for `topic`, in registration order.
    pub(crate) fn dispatch(&self, hub: &HubConnection, topic: &Topic, event: &RealtimeEvent) {
        let callbacks = hub.registry().callbacks_for(topic);
        if callbacks.is_empty() {
            trace!(hub = %self.kind, topic = %topic, "Event with no subscribers");
            return;
        }
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(hub = %self.kind, topic = %topic, callback = %id,
                    "Subscriber callback panicked");
            }
        }
    }
}

/// Maps an event name plus raw arguments to a topic and typed payload.
pub(crate) fn decode(
    kind: HubKind,
    event: &str,
    args: &[Value],
) -> Result<(Topic, RealtimeEvent), DecodeError> {
    match (kind, event) {
        (HubKind::Market, events::EVENT_QUOTE) => {
            let contract_id = contract_arg(event, args)?;
            let quote: QuoteUpdate = parse_payload(event, arg(event, args, 1)?)?;
            Ok((
                Topic::Quotes {
                    contract_id: contract_id.clone(),
                },
                RealtimeEvent::Quote { contract_id, quote },
            ))
        }
        (HubKind::Market, events::EVENT_TRADE) => {
            let contract_id = contract_arg(event, args)?;
            let trades: Vec<TradeUpdate> = parse_batch(event, arg(event, args, 1)?)?;
            Ok((
                Topic::Trades {
                    contract_id: contract_id.clone(),
                },
                RealtimeEvent::Trades {
                    contract_id,
                    trades,
                },
            ))
        }
        (HubKind::Market, events::EVENT_DEPTH) => {
            let contract_id = contract_arg(event, args)?;
            let levels: Vec<DepthLevel> = parse_batch(event, arg(event, args, 1)?)?;
            Ok((
                Topic::Depth {
                    contract_id: contract_id.clone(),
                },
                RealtimeEvent::Depth {
                    contract_id,
                    levels,
                },
            ))
        }
        (HubKind::User, events::EVENT_USER_ACCOUNT) => {
            let account: AccountUpdate =
                parse_payload(event, unwrap_envelope(arg(event, args, 0)?))?;
            Ok((Topic::Accounts, RealtimeEvent::Account { account }))
        }
        (HubKind::User, events::EVENT_USER_ORDER) => {
            let order: OrderUpdate = parse_payload(event, unwrap_envelope(arg(event, args, 0)?))?;
            Ok((
                Topic::Orders {
                    account_id: order.account_id,
                },
                RealtimeEvent::Order { order },
            ))
        }
        (HubKind::User, events::EVENT_USER_POSITION) => {
            let position: PositionUpdate =
                parse_payload(event, unwrap_envelope(arg(event, args, 0)?))?;
            Ok((
                Topic::Positions {
                    account_id: position.account_id,
                },
                RealtimeEvent::Position { position },
            ))
        }
        (HubKind::User, events::EVENT_USER_TRADE) => {
            let trade: UserTradeUpdate =
                parse_payload(event, unwrap_envelope(arg(event, args, 0)?))?;
            Ok((
                Topic::UserTrades {
                    account_id: trade.account_id,
                },
                RealtimeEvent::UserTrade { trade },
            ))
        }
        _ => Err(DecodeError::UnknownEvent(event.to_string())),
    }
}

fn arg<'a>(event: &str, args: &'a [Value], index: usize) -> Result<&'a Value, DecodeError> {
    args.get(index).ok_or_else(|| DecodeError::MissingArgument {
        event: event.to_string(),
        index,
    })
}

fn contract_arg(event: &str, args: &[Value]) -> Result<String, DecodeError> {
    arg(event, args, 0)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DecodeError::InvalidPayload {
            event: event.to_string(),
            reason: "contract id argument is not a string".to_string(),
        })
}

fn parse_payload<T: DeserializeOwned>(event: &str, value: &Value) -> Result<T, DecodeError> {
    serde_json::from_value(value.clone()).map_err(|e| DecodeError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

/// Accepts either a single payload object or a batch of them.
fn parse_batch<T: DeserializeOwned>(event: &str, value: &Value) -> Result<Vec<T>, DecodeError> {
    if value.is_array() {
        parse_payload(event, value)
    } else {
        Ok(vec![parse_payload(event, value)?])
    }
}

/// User hub payloads are sometimes wrapped in an `{action, data}` envelope.
fn unwrap_envelope(value: &Value) -> &Value {
    if let Some(object) = value.as_object() {
        if object.contains_key("action") {
            if let Some(data) = object.get("data") {
                return data;
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_quote_event() {
        let args = vec![
            json!("CON.F.US.ENQ.H25"),
            json!({"lastPrice": 21034.25, "bestBid": 21034.0, "bestAsk": 21034.5}),
        ];
        let (topic, event) = decode(HubKind::Market, events::EVENT_QUOTE, &args).unwrap();
        assert_eq!(
            topic,
            Topic::Quotes {
                contract_id: "CON.F.US.ENQ.H25".to_string()
            }
        );
        assert!(matches!(event, RealtimeEvent::Quote { .. }));
    }

    #[test]
    fn test_decode_trade_batch_and_single() {
        let batch = vec![
            json!("CON.F.US.ENQ.H25"),
            json!([{"price": 21034.25, "type": 0, "volume": 1}]),
        ];
        let (_, event) = decode(HubKind::Market, events::EVENT_TRADE, &batch).unwrap();
        let RealtimeEvent::Trades { trades, .. } = event else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 1);

        let single = vec![
            json!("CON.F.US.ENQ.H25"),
            json!({"price": 21034.25, "type": 1, "volume": 2}),
        ];
        let (_, event) = decode(HubKind::Market, events::EVENT_TRADE, &single).unwrap();
        let RealtimeEvent::Trades { trades, .. } = event else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 1);
    }

    #[test]
    fn test_decode_order_event_with_envelope() {
        let args = vec![json!({
            "action": 1,
            "data": {
                "id": 1001,
                "accountId": 123,
                "contractId": "CON.F.US.ENQ.H25",
                "status": 1,
                "side": 0,
                "size": 2
            }
        })];
        let (topic, _) = decode(HubKind::User, events::EVENT_USER_ORDER, &args).unwrap();
        assert_eq!(topic, Topic::Orders { account_id: 123 });
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let args = vec![json!("CON.F.US.ENQ.H25"), json!({"price": []})];
        assert!(matches!(
            decode(HubKind::Market, events::EVENT_TRADE, &args),
            Err(DecodeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_missing_argument() {
        assert!(matches!(
            decode(HubKind::Market, events::EVENT_QUOTE, &[]),
            Err(DecodeError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(matches!(
            decode(HubKind::Market, "GatewaySomethingElse", &[]),
            Err(DecodeError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_decode_rejects_market_event_on_user_hub() {
        let args = vec![json!("CON.F.US.ENQ.H25"), json!({})];
        assert!(matches!(
            decode(HubKind::User, events::EVENT_QUOTE, &args),
            Err(DecodeError::UnknownEvent(_))
        ));
    }
}
