//! New-order detection: which closed orders appeared since the last poll.

use crate::models::{Order, OrderSnapshot};

/// Baseline for the next diff: the closed orders seen by the last
/// successful poll.
#[derive(Debug, Default)]
pub struct OrderSnapshotStore {
    snapshot: OrderSnapshot,
}

impl OrderSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> &OrderSnapshot {
        &self.snapshot
    }

    /// Replace the baseline wholesale.
    pub fn commit(&mut self, snapshot: OrderSnapshot) {
        self.snapshot = snapshot;
    }
}

/// Diffs consecutive snapshots.
#[derive(Debug, Clone, Default)]
pub struct NewOrderDetector {
    ignored_prefixes: Vec<String>,
}

impl NewOrderDetector {
    pub fn new(ignored_prefixes: Vec<String>) -> Self {
        Self { ignored_prefixes }
    }

    /// Closed orders in `current` whose id is not a key of `previous`.
    ///
    /// An empty `previous` yields nothing: on cold start every historical
    /// order would otherwise look new. Results are ordered by update time,
    /// then id.
    pub fn detect(&self, previous: &OrderSnapshot, current: &OrderSnapshot) -> Vec<Order> {
        if previous.is_empty() {
            return Vec::new();
        }

        let mut new_orders: Vec<Order> = current
            .orders()
            .filter(|o| o.is_closed() && !previous.contains(&o.id))
            .filter(|o| !self.is_ignored(o))
            .cloned()
            .collect();

        new_orders.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        new_orders
    }

    fn is_ignored(&self, order: &Order) -> bool {
        self.ignored_prefixes.iter().any(|p| order.has_id_prefix(p))
    }
}
