//! Self-copy protection: the copied-order ledger and the tag on every order
//! this bot places.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::models::Order;

/// Prefix of every client order id assigned by this bot.
pub const SELF_COPY_TAG: &str = "swpr";

/// Length of generated client order ids; fits every supported venue's limit.
const CLIENT_ORDER_ID_LEN: usize = 18;

/// Fresh client order id carrying [`SELF_COPY_TAG`].
pub fn new_client_order_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}",
        SELF_COPY_TAG,
        &random[..CLIENT_ORDER_ID_LEN - SELF_COPY_TAG.len()]
    )
}

pub fn is_self_tagged(order: &Order) -> bool {
    order.has_id_prefix(SELF_COPY_TAG)
}

/// Order ids recently produced on each destination account, with the cycle
/// that produced them.
#[derive(Debug, Default)]
pub struct CopiedOrderLedger {
    entries: HashMap<String, HashMap<String, u64>>,
}

impl CopiedOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, account_id: &str, order_id: &str, cycle: u64) {
        self.entries
            .entry(account_id.to_string())
            .or_default()
            .insert(order_id.to_string(), cycle);
    }

    #[cfg(test)]
    pub fn contains(&self, account_id: &str, order_id: &str) -> bool {
        self.entries
            .get(account_id)
            .is_some_and(|ids| ids.contains_key(order_id))
    }

    /// Remove an entry, reporting whether it was present.
    pub fn consume(&mut self, account_id: &str, order_id: &str) -> bool {
        let Some(ids) = self.entries.get_mut(account_id) else {
            return false;
        };
        let found = ids.remove(order_id).is_some();
        if ids.is_empty() {
            self.entries.remove(account_id);
        }
        found
    }

    /// Drop entries recorded `retention` or more cycles before `current_cycle`.
    /// Run at the end of a cycle, an entry from cycle N is checked by the
    /// filter in cycles N+1 ..= N+retention and no later. Returns how many
    /// were dropped.
    pub fn expire(&mut self, current_cycle: u64, retention: u64) -> usize {
        let mut dropped = 0;
        for ids in self.entries.values_mut() {
            let before = ids.len();
            ids.retain(|_, recorded| current_cycle.saturating_sub(*recorded) < retention);
            dropped += before - ids.len();
        }
        self.entries.retain(|_, ids| !ids.is_empty());
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a candidate was recognised as this bot's own order. Both checks
/// always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfCopyMatch {
    pub ledger: bool,
    pub tag: bool,
}

impl SelfCopyMatch {
    pub fn any(&self) -> bool {
        self.ledger || self.tag
    }
}

/// Candidates split into genuine source activity and self-copies.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<Order>,
    pub excluded: Vec<(Order, SelfCopyMatch)>,
}

/// Remove this bot's own orders from the candidates polled on `account_id`,
/// consuming matching ledger entries.
pub fn filter_self_copies(
    candidates: Vec<Order>,
    ledger: &mut CopiedOrderLedger,
    account_id: &str,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    for order in candidates {
        let matched = SelfCopyMatch {
            ledger: ledger.consume(account_id, &order.id),
            tag: is_self_tagged(&order),
        };

        if matched.any() {
            debug!(
                order_id = %order.id,
                ledger = matched.ledger,
                tag = matched.tag,
                "Skipping self-copy"
            );
            outcome.excluded.push((order, matched));
        } else {
            outcome.kept.push(order);
        }
    }

    outcome
}
