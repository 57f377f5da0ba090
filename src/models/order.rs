//! Order model shared by every venue and by the replication pipeline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Parse a venue side string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution type of an order.
///
/// Venue types the pipeline has no special handling for are carried verbatim
/// in `Other` so that mirrored copies can reuse them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderType {
    Market,
    Limit,
    Other(String),
}

impl OrderType {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            other => OrderType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Other(s) => s,
        }
    }

    /// Whether the type needs a price to be submitted.
    pub fn requires_price(&self) -> bool {
        match self {
            OrderType::Market => false,
            OrderType::Limit => true,
            OrderType::Other(s) => s.contains("LIMIT") && !s.contains("MARKET"),
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle marker. Only `Closed` orders take part in diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Accepted but not fully executed yet
    Open,
    /// Fully executed
    Closed,
    /// Cancelled, expired or rejected by the venue
    Canceled,
}

/// An order as read from, or returned by, an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Identifier unique per account; the client order id on venues that accept one
    pub id: String,

    /// Caller-assigned identifier when distinct from `id`
    pub client_order_id: Option<String>,

    /// Traded instrument (e.g. "BTCUSDT")
    pub symbol: String,

    pub side: OrderSide,

    pub order_type: OrderType,

    /// Executed (or requested) size; `None` when the venue reported a value
    /// that could not be parsed
    pub quantity: Option<Decimal>,

    /// Price the order was submitted with; `None` for market orders
    pub price: Option<Decimal>,

    /// Volume-weighted fill price, once anything executed
    pub average_price: Option<Decimal>,

    pub status: OrderStatus,

    /// Last update time reported by the venue
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_closed(&self) -> bool {
        self.status == OrderStatus::Closed
    }

    /// True if either identifier starts with `prefix`.
    pub fn has_id_prefix(&self, prefix: &str) -> bool {
        self.id.starts_with(prefix)
            || self
                .client_order_id
                .as_deref()
                .is_some_and(|id| id.starts_with(prefix))
    }

    pub fn quantity_display(&self) -> String {
        self.quantity
            .map(|q| q.normalize().to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

/// Destination order request produced by the transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Only set for price-bearing order types
    pub price: Option<Decimal>,
    /// Caller-assigned id; filled in per submission by the dispatcher
    pub client_order_id: Option<String>,
}

impl OrderSpec {
    pub fn with_client_order_id(mut self, id: String) -> Self {
        self.client_order_id = Some(id);
        self
    }
}

/// Closed orders of one account keyed by order id, as of one poll.
///
/// A snapshot is only ever replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSnapshot {
    orders: HashMap<String, Order>,
}

impl OrderSnapshot {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.orders.contains_key(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }
}

impl FromIterator<Order> for OrderSnapshot {
    fn from_iter<I: IntoIterator<Item = Order>>(iter: I) -> Self {
        Self {
            orders: iter.into_iter().map(|o| (o.id.clone(), o)).collect(),
        }
    }
}
