//! In-memory exchange used by the pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Order, OrderSide, OrderSnapshot, OrderSpec, OrderStatus, OrderType};

use super::{ExchangeClient, ExchangeError};

/// Scriptable exchange account.
pub struct MockExchange {
    account_id: String,
    closed: Mutex<HashMap<String, Order>>,
    placed: Mutex<Vec<OrderSpec>>,
    fetch_error: Mutex<Option<fn() -> ExchangeError>>,
    place_error: Mutex<Option<fn() -> ExchangeError>>,
    fetch_delay: Mutex<Option<Duration>>,
    place_delay: Mutex<Option<Duration>>,
    /// Placed orders show up in the closed list, as market fills on the same account would
    fills_into_closed: bool,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            closed: Mutex::new(HashMap::new()),
            placed: Mutex::new(Vec::new()),
            fetch_error: Mutex::new(None),
            place_error: Mutex::new(None),
            fetch_delay: Mutex::new(None),
            place_delay: Mutex::new(None),
            fills_into_closed: false,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_fills_into_closed(mut self) -> Self {
        self.fills_into_closed = true;
        self
    }

    pub fn add_closed(&self, order: Order) {
        self.closed.lock().unwrap().insert(order.id.clone(), order);
    }

    pub fn fail_fetches(&self, err: Option<fn() -> ExchangeError>) {
        *self.fetch_error.lock().unwrap() = err;
    }

    pub fn fail_placements(&self, err: Option<fn() -> ExchangeError>) {
        *self.place_error.lock().unwrap() = err;
    }

    /// Make every fetch take `delay` before answering.
    pub fn slow_fetches(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    /// Make every placement take `delay` before answering.
    pub fn slow_placements(&self, delay: Option<Duration>) {
        *self.place_delay.lock().unwrap() = delay;
    }

    pub fn placed(&self) -> Vec<OrderSpec> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn list_closed_orders(&self) -> Result<OrderSnapshot, ExchangeError> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(make_err) = *self.fetch_error.lock().unwrap() {
            return Err(make_err());
        }
        Ok(self.closed.lock().unwrap().values().cloned().collect())
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<Order, ExchangeError> {
        let delay = *self.place_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(make_err) = *self.place_error.lock().unwrap() {
            return Err(make_err());
        }
        self.placed.lock().unwrap().push(spec.clone());

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order = Order {
            id: spec
                .client_order_id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", self.account_id, seq)),
            client_order_id: None,
            symbol: spec.symbol.clone(),
            side: spec.side,
            order_type: spec.order_type.clone(),
            quantity: Some(spec.quantity),
            price: spec.price,
            average_price: None,
            status: OrderStatus::Closed,
            updated_at: None,
        };
        if self.fills_into_closed {
            self.add_closed(order.clone());
        }
        Ok(order)
    }
}

/// Closed market order with the given id, side BUY.
pub fn market_order(id: &str, symbol: &str, quantity: Decimal) -> Order {
    Order {
        id: id.to_string(),
        client_order_id: None,
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        quantity: Some(quantity),
        price: None,
        average_price: None,
        status: OrderStatus::Closed,
        updated_at: None,
    }
}
