//! Data models for orders and per-poll order snapshots.

mod order;

pub use order::{Order, OrderSide, OrderSnapshot, OrderSpec, OrderStatus, OrderType};
