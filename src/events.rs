//! Typed event models and the Gateway realtime wire contract
//!
//! Event and method names are fixed strings matching the remote hubs; they
//! are part of the wire contract, not configuration. Payload numerics arrive
//! as either JSON numbers or strings depending on gateway version, so price
//! and size fields use flexible deserializers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::hub::HubKind;

/// Market hub event names
pub const EVENT_QUOTE: &str = "GatewayQuote";
pub const EVENT_TRADE: &str = "GatewayTrade";
pub const EVENT_DEPTH: &str = "GatewayDepth";

/// User hub event names
pub const EVENT_USER_ACCOUNT: &str = "GatewayUserAccount";
pub const EVENT_USER_ORDER: &str = "GatewayUserOrder";
pub const EVENT_USER_POSITION: &str = "GatewayUserPosition";
pub const EVENT_USER_TRADE: &str = "GatewayUserTrade";

/// Market hub subscription methods
pub const METHOD_SUBSCRIBE_QUOTES: &str = "SubscribeContractQuotes";
pub const METHOD_UNSUBSCRIBE_QUOTES: &str = "UnsubscribeContractQuotes";
pub const METHOD_SUBSCRIBE_TRADES: &str = "SubscribeContractTrades";
pub const METHOD_UNSUBSCRIBE_TRADES: &str = "UnsubscribeContractTrades";
pub const METHOD_SUBSCRIBE_DEPTH: &str = "SubscribeContractMarketDepth";
pub const METHOD_UNSUBSCRIBE_DEPTH: &str = "UnsubscribeContractMarketDepth";

/// User hub subscription methods
pub const METHOD_SUBSCRIBE_ACCOUNTS: &str = "SubscribeAccounts";
pub const METHOD_UNSUBSCRIBE_ACCOUNTS: &str = "UnsubscribeAccounts";
pub const METHOD_SUBSCRIBE_ORDERS: &str = "SubscribeOrders";
pub const METHOD_UNSUBSCRIBE_ORDERS: &str = "UnsubscribeOrders";
pub const METHOD_SUBSCRIBE_POSITIONS: &str = "SubscribePositions";
pub const METHOD_UNSUBSCRIBE_POSITIONS: &str = "UnsubscribePositions";
pub const METHOD_SUBSCRIBE_USER_TRADES: &str = "SubscribeTrades";
pub const METHOD_UNSUBSCRIBE_USER_TRADES: &str = "UnsubscribeTrades";

/// Event names pushed by a hub, used to register transport handlers.
pub(crate) fn event_names(kind: HubKind) -> &'static [&'static str] {
    match kind {
        HubKind::Market => &[EVENT_QUOTE, EVENT_TRADE, EVENT_DEPTH],
        HubKind::User => &[
            EVENT_USER_ACCOUNT,
            EVENT_USER_ORDER,
            EVENT_USER_POSITION,
            EVENT_USER_TRADE,
        ],
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: String, reason: String },
    #[error("missing argument {index} for {event}")]
    MissingArgument { event: String, index: usize },
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// High-level events decoded from hub pushes
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RealtimeEvent {
    /// Top-of-book quote for a contract
    Quote {
        contract_id: String,
        quote: QuoteUpdate,
    },
    /// Executed trades for a contract (servers deliver batches)
    Trades {
        contract_id: String,
        trades: Vec<TradeUpdate>,
    },
    /// Market depth levels for a contract
    Depth {
        contract_id: String,
        levels: Vec<DepthLevel>,
    },
    /// Account balance/state update
    Account { account: AccountUpdate },
    /// Order lifecycle update
    Order { order: OrderUpdate },
    /// Position update
    Position { position: PositionUpdate },
    /// Fill belonging to the authenticated user
    UserTrade { trade: UserTradeUpdate },
}

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{Error, Visitor};
        use std::fmt;

        struct SideVisitor;

        impl<'de> Visitor<'de> for SideVisitor {
            type Value = Side;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a side as 0/1 or \"buy\"/\"sell\"")
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(Side::Buy),
                    1 => Ok(Side::Sell),
                    _ => Err(E::custom(format!("invalid side: {}", value))),
                }
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<Self::Value, E> {
                u64::try_from(value)
                    .map_err(|_| E::custom(format!("invalid side: {}", value)))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
                match value.to_lowercase().as_str() {
                    "buy" | "bid" => Ok(Side::Buy),
                    "sell" | "ask" => Ok(Side::Sell),
                    _ => Err(E::unknown_variant(value, &["buy", "sell"])),
                }
            }
        }

        deserializer.deserialize_any(SideVisitor)
    }
}

/// Order status codes pushed by the user hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    None,
    Open,
    Filled,
    Cancelled,
    Expired,
    Rejected,
    Pending,
    /// Unrecognized status code, kept so new gateway codes do not drop events
    Unknown(i32),
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = i32::deserialize(deserializer)?;
        Ok(match code {
            0 => OrderStatus::None,
            1 => OrderStatus::Open,
            2 => OrderStatus::Filled,
            3 => OrderStatus::Cancelled,
            4 => OrderStatus::Expired,
            5 => OrderStatus::Rejected,
            6 => OrderStatus::Pending,
            other => OrderStatus::Unknown(other),
        })
    }
}

/// Position direction codes pushed by the user hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionType {
    Undefined,
    Long,
    Short,
    Unknown(i32),
}

impl<'de> Deserialize<'de> for PositionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = i32::deserialize(deserializer)?;
        Ok(match code {
            0 => PositionType::Undefined,
            1 => PositionType::Long,
            2 => PositionType::Short,
            other => PositionType::Unknown(other),
        })
    }
}

/// Top-of-book quote payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub symbol_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub last_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_ask: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub change: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub change_percent: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub open: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub high: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub low: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Executed trade payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeUpdate {
    #[serde(default)]
    pub symbol_id: Option<String>,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub price: Decimal,
    #[serde(rename = "type")]
    pub side: Side,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub volume: Decimal,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Single market depth level
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthLevel {
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub volume: Decimal,
    /// DOM entry type code as pushed by the gateway
    #[serde(rename = "type")]
    pub kind: i32,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub current_volume: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Account state payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub balance: Decimal,
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub simulated: bool,
}

/// Order lifecycle payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    pub status: OrderStatus,
    pub side: Side,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub limit_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub stop_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub fill_volume: Option<Decimal>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_timestamp: Option<DateTime<Utc>>,
}

/// Position payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub size: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub average_price: Decimal,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Fill payload for the authenticated user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTradeUpdate {
    pub id: i64,
    pub account_id: i64,
    pub contract_id: String,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub price: Decimal,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub fees: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub profit_and_loss: Option<Decimal>,
    pub side: Side,
    #[serde(deserialize_with = "deserialize_decimal_flexible")]
    pub size: Decimal,
    #[serde(default)]
    pub voided: bool,
    pub order_id: i64,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Helper function to deserialize decimal from either string or number
fn deserialize_decimal_flexible<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{Error, Visitor};
    use std::fmt;

    struct DecimalVisitor;

    impl<'de> Visitor<'de> for DecimalVisitor {
        type Value = Decimal;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a decimal number as string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: Error,
        {
            value
                .parse::<Decimal>()
                .map_err(|_| E::custom(format!("Invalid decimal string: {}", value)))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Decimal::try_from(value)
                .map_err(|_| E::custom(format!("Invalid decimal number: {}", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Decimal::from(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(Decimal::from(value))
        }
    }

    deserializer.deserialize_any(DecimalVisitor)
}

/// Optional variant of the flexible decimal deserializer
fn deserialize_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_decimal_flexible")] Decimal);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|wrapper| wrapper.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_quote_parses_numeric_and_string_prices() {
        let quote: QuoteUpdate = serde_json::from_value(json!({
            "symbol": "F.US.ENQ",
            "lastPrice": 21034.25,
            "bestBid": "21034.00",
            "bestAsk": "21034.50",
            "volume": 1500,
            "timestamp": "2025-03-01T14:30:00+00:00"
        }))
        .unwrap();

        assert_eq!(quote.symbol.as_deref(), Some("F.US.ENQ"));
        assert_eq!(quote.last_price, Some(dec!(21034.25)));
        assert_eq!(quote.best_bid, Some(dec!(21034.00)));
        assert_eq!(quote.best_ask, Some(dec!(21034.50)));
        assert_eq!(quote.volume, Some(dec!(1500)));
        assert!(quote.timestamp.is_some());
        assert!(quote.open.is_none());
    }

    #[test]
    fn test_trade_side_from_code() {
        let trade: TradeUpdate = serde_json::from_value(json!({
            "symbolId": "F.US.ENQ",
            "price": 21034.25,
            "type": 1,
            "volume": 3
        }))
        .unwrap();

        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.volume, dec!(3));
    }

    #[test]
    fn test_side_from_string() {
        assert_eq!(
            serde_json::from_value::<Side>(json!("Buy")).unwrap(),
            Side::Buy
        );
        assert!(serde_json::from_value::<Side>(json!("hold")).is_err());
    }

    #[test]
    fn test_order_parses_status_and_prices() {
        let order: OrderUpdate = serde_json::from_value(json!({
            "id": 1001,
            "accountId": 123,
            "contractId": "CON.F.US.ENQ.H25",
            "status": 1,
            "side": 0,
            "size": 2,
            "limitPrice": "21000.00",
            "creationTimestamp": "2025-03-01T14:30:00+00:00"
        }))
        .unwrap();

        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.limit_price, Some(dec!(21000.00)));
        assert!(order.stop_price.is_none());
    }

    #[test]
    fn test_unknown_order_status_is_preserved() {
        let order: OrderUpdate = serde_json::from_value(json!({
            "id": 1,
            "accountId": 2,
            "contractId": "CON.F.US.ENQ.H25",
            "status": 42,
            "side": 1,
            "size": 1
        }))
        .unwrap();

        assert_eq!(order.status, OrderStatus::Unknown(42));
    }

    #[test]
    fn test_user_trade_parses_fill() {
        let trade: UserTradeUpdate = serde_json::from_value(json!({
            "id": 9001,
            "accountId": 123,
            "contractId": "CON.F.US.ENQ.H25",
            "price": 21034.25,
            "fees": 1.24,
            "side": 1,
            "size": 2,
            "voided": false,
            "orderId": 1002
        }))
        .unwrap();

        assert_eq!(trade.order_id, 1002);
        assert_eq!(trade.fees, Some(dec!(1.24)));
        assert!(!trade.voided);
    }

    #[test]
    fn test_position_type_codes() {
        let position: PositionUpdate = serde_json::from_value(json!({
            "id": 7,
            "accountId": 123,
            "contractId": "CON.F.US.ENQ.H25",
            "type": 2,
            "size": 1,
            "averagePrice": 21010.5
        }))
        .unwrap();

        assert_eq!(position.position_type, PositionType::Short);
    }

    #[test]
    fn test_malformed_trade_is_rejected() {
        let result = serde_json::from_value::<TradeUpdate>(json!({
            "price": "not-a-number",
            "type": 0,
            "volume": 1
        }));
        assert!(result.is_err());
    }
}
