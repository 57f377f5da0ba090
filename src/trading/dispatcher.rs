//! Fan-out of copy orders to every destination account.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::api::{ExchangeClient, ExchangeError};
use crate::models::{Order, OrderSpec};

use super::self_copy::{new_client_order_id, CopiedOrderLedger};
use super::TransformError;

/// Outcome of one submission to one destination.
#[derive(Debug)]
pub struct DestinationResult {
    pub account_id: String,
    pub result: Result<Order, ExchangeError>,
}

#[derive(Debug)]
pub enum CopyOutcome {
    /// The source order could not be turned into a copy; nothing was sent
    NotCopied(TransformError),
    /// One result per destination, in destination order
    Dispatched {
        spec: OrderSpec,
        results: Vec<DestinationResult>,
    },
}

/// What happened to one detected source order.
#[derive(Debug)]
pub struct CopyReport {
    pub source: Order,
    pub outcome: CopyOutcome,
}

impl CopyReport {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &Order)> {
        self.results()
            .iter()
            .filter_map(|r| r.result.as_ref().ok().map(|o| (r.account_id.as_str(), o)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ExchangeError)> {
        self.results()
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.account_id.as_str(), e)))
    }

    /// No destination received the copy.
    pub fn is_total_failure(&self) -> bool {
        self.successes().next().is_none()
    }

    fn results(&self) -> &[DestinationResult] {
        match &self.outcome {
            CopyOutcome::Dispatched { results, .. } => results,
            CopyOutcome::NotCopied(_) => &[],
        }
    }
}

/// Submits copies to a fixed set of destination clients.
pub struct ReplicationDispatcher {
    destinations: Vec<Arc<dyn ExchangeClient>>,
    request_timeout: Duration,
}

impl ReplicationDispatcher {
    pub fn new(destinations: Vec<Arc<dyn ExchangeClient>>, request_timeout: Duration) -> Self {
        Self {
            destinations,
            request_timeout,
        }
    }

    pub fn destination_ids(&self) -> Vec<&str> {
        self.destinations.iter().map(|d| d.account_id()).collect()
    }

    /// Submit every copy to every destination concurrently, one attempt per
    /// pair. Each success is recorded in `ledger` under its destination
    /// account as it completes.
    pub async fn dispatch(
        &self,
        copies: Vec<(Order, OrderSpec)>,
        ledger: &mut CopiedOrderLedger,
        cycle: u64,
    ) -> Vec<CopyReport> {
        let mut pending = FuturesUnordered::new();

        for (copy_idx, (_, spec)) in copies.iter().enumerate() {
            for (dest_idx, client) in self.destinations.iter().enumerate() {
                let spec = spec.clone().with_client_order_id(new_client_order_id());
                let client = Arc::clone(client);
                let timeout = self.request_timeout;

                pending.push(async move {
                    debug!(
                        account = %client.account_id(),
                        client_order_id = ?spec.client_order_id,
                        symbol = %spec.symbol,
                        "Submitting copy"
                    );
                    let result = tokio::time::timeout(timeout, client.place_order(&spec))
                        .await
                        .unwrap_or(Err(ExchangeError::Timeout));
                    (copy_idx, dest_idx, result)
                });
            }
        }

        let mut collected: Vec<Vec<(usize, DestinationResult)>> =
            copies.iter().map(|_| Vec::with_capacity(self.destinations.len())).collect();

        while let Some((copy_idx, dest_idx, result)) = pending.next().await {
            let account_id = self.destinations[dest_idx].account_id();
            if let Ok(order) = &result {
                ledger.record(account_id, &order.id, cycle);
            }
            collected[copy_idx].push((
                dest_idx,
                DestinationResult {
                    account_id: account_id.to_string(),
                    result,
                },
            ));
        }

        copies
            .into_iter()
            .zip(collected)
            .map(|((source, spec), mut results)| {
                results.sort_by_key(|(dest_idx, _)| *dest_idx);
                CopyReport {
                    source,
                    outcome: CopyOutcome::Dispatched {
                        spec,
                        results: results.into_iter().map(|(_, r)| r).collect(),
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{market_order, MockExchange};
    use crate::trading::self_copy::SELF_COPY_TAG;
    use rust_decimal_macros::dec;

    fn spec_for(order: &Order) -> OrderSpec {
        OrderSpec {
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type.clone(),
            quantity: order.quantity.unwrap(),
            price: None,
            client_order_id: None,
        }
    }

    fn copy(id: &str) -> (Order, OrderSpec) {
        let order = market_order(id, "TESTUSDT", dec!(2));
        let spec = spec_for(&order);
        (order, spec)
    }

    #[tokio::test]
    async fn test_one_failing_destination_does_not_block_others() {
        let ok_a = Arc::new(MockExchange::new("dest-a"));
        let broken = Arc::new(MockExchange::new("dest-b"));
        broken.fail_placements(Some(|| ExchangeError::InsufficientBalance("margin".into())));
        let ok_c = Arc::new(MockExchange::new("dest-c"));

        let dispatcher = ReplicationDispatcher::new(
            vec![ok_a.clone(), broken.clone(), ok_c.clone()],
            Duration::from_secs(1),
        );
        let mut ledger = CopiedOrderLedger::new();

        let reports = dispatcher.dispatch(vec![copy("1")], &mut ledger, 1).await;

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.successes().count(), 2);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "dest-b");
        assert!(!report.is_total_failure());

        assert_eq!(ok_a.placed().len(), 1);
        assert_eq!(ok_c.placed().len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_destination_times_out_alone() {
        let fast = Arc::new(MockExchange::new("fast"));
        let slow = Arc::new(MockExchange::new("slow"));
        slow.slow_placements(Some(Duration::from_secs(30)));
        let also_fast = Arc::new(MockExchange::new("also-fast"));

        let dispatcher = ReplicationDispatcher::new(
            vec![fast.clone(), slow.clone(), also_fast.clone()],
            Duration::from_secs(1),
        );
        let mut ledger = CopiedOrderLedger::new();

        let reports = dispatcher.dispatch(vec![copy("1")], &mut ledger, 1).await;

        let report = &reports[0];
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "slow");
        assert!(matches!(failures[0].1, ExchangeError::Timeout));

        let accounts: Vec<_> = report.successes().map(|(a, _)| a).collect();
        assert_eq!(accounts, vec!["fast", "also-fast"]);
        assert!(slow.placed().is_empty());
        assert_eq!(ledger.len(), 2);
        for (account, order) in report.successes() {
            assert!(ledger.contains(account, &order.id));
        }
    }

    #[tokio::test]
    async fn test_results_keep_destination_order() {
        let dispatcher = ReplicationDispatcher::new(
            vec![
                Arc::new(MockExchange::new("first")),
                Arc::new(MockExchange::new("second")),
            ],
            Duration::from_secs(1),
        );
        let mut ledger = CopiedOrderLedger::new();

        let reports = dispatcher
            .dispatch(vec![copy("1"), copy("2")], &mut ledger, 1)
            .await;

        assert_eq!(reports[0].source.id, "1");
        assert_eq!(reports[1].source.id, "2");
        for report in &reports {
            let accounts: Vec<_> = report.successes().map(|(a, _)| a).collect();
            assert_eq!(accounts, vec!["first", "second"]);
        }
    }

    #[tokio::test]
    async fn test_submissions_are_tagged_and_recorded() {
        let dest = Arc::new(MockExchange::new("dest"));
        let dispatcher = ReplicationDispatcher::new(vec![dest.clone()], Duration::from_secs(1));
        let mut ledger = CopiedOrderLedger::new();

        let reports = dispatcher.dispatch(vec![copy("1")], &mut ledger, 4).await;

        let placed = dest.placed();
        assert_eq!(placed.len(), 1);
        let client_id = placed[0].client_order_id.clone().unwrap();
        assert!(client_id.starts_with(SELF_COPY_TAG));

        let (_, order) = reports[0].successes().next().unwrap();
        assert!(ledger.contains("dest", &order.id));
    }

    #[tokio::test]
    async fn test_total_failure_records_nothing() {
        let dest = Arc::new(MockExchange::new("dest"));
        dest.fail_placements(Some(|| ExchangeError::Rejected("min notional".into())));
        let dispatcher = ReplicationDispatcher::new(vec![dest], Duration::from_secs(1));
        let mut ledger = CopiedOrderLedger::new();

        let reports = dispatcher.dispatch(vec![copy("1")], &mut ledger, 1).await;

        assert!(reports[0].is_total_failure());
        assert_eq!(reports[0].failures().count(), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_not_copied_report_has_no_results() {
        let report = CopyReport {
            source: market_order("1", "TESTUSDT", dec!(0)),
            outcome: CopyOutcome::NotCopied(TransformError::InvalidQuantity {
                order_id: "1".into(),
                quantity: dec!(0),
            }),
        };
        assert!(report.is_total_failure());
        assert_eq!(report.failures().count(), 0);
    }
}
