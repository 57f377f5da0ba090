//! Bot runner: the serialized poll loop for one source account and its
//! destinations.
//!
//! Each cycle fetches the source's closed orders, diffs them against the
//! previous snapshot, drops self-copies, transforms the rest and fans them
//! out to every destination.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{ExchangeClient, ExchangeError};
use crate::models::Order;
use crate::trading::{
    filter_self_copies, CopiedOrderLedger, CopyOutcome, CopyReport, FilterOutcome,
    NewOrderDetector, OrderSnapshotStore, OrderTransformer, ReplicationConfig,
    ReplicationDispatcher, SelfCopyMatch,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Fixed delay between cycle starts; a slow cycle delays the next tick
    pub poll_interval: Duration,

    /// Upper bound on one closed-order fetch, retries included
    pub fetch_timeout: Duration,

    /// Upper bound on one order submission
    pub submit_timeout: Duration,

    pub replication: ReplicationConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2100),
            fetch_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(10),
            replication: ReplicationConfig::default(),
        }
    }
}

/// What one completed cycle did.
#[derive(Debug)]
pub struct CycleSummary {
    pub cycle: u64,
    /// Orders the detector reported as new, self-copies included
    pub detected: usize,
    pub excluded: Vec<(Order, SelfCopyMatch)>,
    /// One report per genuine new source order
    pub reports: Vec<CopyReport>,
    pub ledger_expired: usize,
}

impl CycleSummary {
    pub fn copies_placed(&self) -> usize {
        self.reports.iter().map(|r| r.successes().count()).sum()
    }

    pub fn destination_failures(&self) -> usize {
        self.reports.iter().map(|r| r.failures().count()).sum()
    }
}

/// Main bot runner. Owns all replication state for its pairing.
pub struct Bot {
    config: BotConfig,
    source: Arc<dyn ExchangeClient>,
    dispatcher: ReplicationDispatcher,
    detector: NewOrderDetector,
    transformer: OrderTransformer,

    // Runtime state
    store: OrderSnapshotStore,
    ledger: CopiedOrderLedger,
    cycle: u64,
    stats: BotStats,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        source: Arc<dyn ExchangeClient>,
        destinations: Vec<Arc<dyn ExchangeClient>>,
    ) -> Result<Self> {
        config.replication.validate()?;
        if destinations.is_empty() {
            bail!("At least one destination account is required");
        }
        if config.poll_interval.is_zero() {
            bail!("Poll interval must be positive");
        }

        let dispatcher = ReplicationDispatcher::new(destinations, config.submit_timeout);
        let detector = NewOrderDetector::new(config.replication.ignored_prefixes.clone());
        let transformer = OrderTransformer::new(&config.replication);

        Ok(Self {
            config,
            source,
            dispatcher,
            detector,
            transformer,
            store: OrderSnapshotStore::new(),
            ledger: CopiedOrderLedger::new(),
            cycle: 0,
            stats: BotStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stats(&self) -> BotStats {
        BotStats {
            is_running: !self.shutdown.load(Ordering::SeqCst),
            ledger_entries: self.ledger.len(),
            ..self.stats.clone()
        }
    }

    /// Main run loop. Returns once the shutdown flag is set and the running
    /// cycle has finished.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            source = %self.source.account_id(),
            destinations = ?self.dispatcher.destination_ids(),
            ratio = %self.config.replication.ratio,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting bot run loop"
        );

        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.run_cycle().await {
                Ok(summary) => debug!(
                    cycle = summary.cycle,
                    detected = summary.detected,
                    excluded = summary.excluded.len(),
                    copies = summary.copies_placed(),
                    "Cycle complete"
                ),
                Err(e) => error!(error = %format!("{:#}", e), "Cycle failed"),
            }
        }

        info!("Bot stopped");
        Ok(())
    }

    /// One fetch, detect, filter, transform, dispatch sequence.
    ///
    /// A failed fetch aborts the cycle and leaves the snapshot untouched.
    /// Once the fetch succeeds the snapshot is committed whatever happens to
    /// the copies.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        self.cycle += 1;
        let cycle = self.cycle;
        self.stats.cycles += 1;
        debug!(cycle, "Bot tick");

        let current = match tokio::time::timeout(
            self.config.fetch_timeout,
            self.source.list_closed_orders(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout),
        };
        let current = match current.with_context(|| {
            format!(
                "Failed to fetch closed orders for {}",
                self.source.account_id()
            )
        }) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.failed_cycles += 1;
                return Err(e);
            }
        };

        let detected = self.detector.detect(self.store.baseline(), &current);
        self.store.commit(current);

        let detected_count = detected.len();
        let FilterOutcome { kept, excluded } =
            filter_self_copies(detected, &mut self.ledger, self.source.account_id());

        let mut reports = Vec::with_capacity(kept.len());
        let mut copies = Vec::with_capacity(kept.len());
        for order in kept {
            match self.transformer.transform(&order) {
                Ok(spec) => copies.push((order, spec)),
                Err(e) => reports.push(CopyReport {
                    source: order,
                    outcome: CopyOutcome::NotCopied(e),
                }),
            }
        }

        reports.extend(self.dispatcher.dispatch(copies, &mut self.ledger, cycle).await);
        for report in &reports {
            log_report(report);
        }

        let ledger_expired = self
            .ledger
            .expire(cycle, self.config.replication.ledger_retention_cycles);
        if ledger_expired > 0 {
            debug!(cycle, expired = ledger_expired, "Expired unobserved ledger entries");
        }

        let summary = CycleSummary {
            cycle,
            detected: detected_count,
            excluded,
            reports,
            ledger_expired,
        };
        self.record_stats(&summary);
        Ok(summary)
    }

    fn record_stats(&mut self, summary: &CycleSummary) {
        self.stats.orders_detected += summary.detected as u64;
        self.stats.self_copies_filtered += summary.excluded.len() as u64;
        self.stats.copies_placed += summary.copies_placed() as u64;
        self.stats.destination_failures += summary.destination_failures() as u64;
        self.stats.orders_not_copied += summary
            .reports
            .iter()
            .filter(|r| matches!(r.outcome, CopyOutcome::NotCopied(_)))
            .count() as u64;
    }
}

fn log_report(report: &CopyReport) {
    let source = &report.source;

    match &report.outcome {
        CopyOutcome::NotCopied(e) => {
            error!(source_id = %source.id, symbol = %source.symbol, error = %e, "Order not copied");
        }
        CopyOutcome::Dispatched { spec, .. } => {
            for (account, e) in report.failures() {
                warn!(
                    source_id = %source.id,
                    destination = %account,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Copy failed on destination"
                );
            }

            if report.is_total_failure() {
                error!(
                    source_id = %source.id,
                    symbol = %source.symbol,
                    "Copy failed on every destination"
                );
                return;
            }

            let copies: Vec<String> = report
                .successes()
                .map(|(account, order)| {
                    format!("{}:{} qty {}", account, order.id, order.quantity_display())
                })
                .collect();
            info!(
                source_id = %source.id,
                side = %source.side,
                quantity = %source.quantity_display(),
                symbol = %source.symbol,
                order_type = %source.order_type,
                copy_quantity = %spec.quantity.normalize(),
                copies = %copies.join(", "),
                "Copied order"
            );
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone, Default)]
pub struct BotStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub orders_detected: u64,
    pub self_copies_filtered: u64,
    pub orders_not_copied: u64,
    pub copies_placed: u64,
    pub destination_failures: u64,
    pub ledger_entries: usize,
    pub is_running: bool,
}

impl fmt::Display for BotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Cycles:           {} (Failed: {})", self.cycles, self.failed_cycles)?;
        writeln!(f, "Orders Detected:  {}", self.orders_detected)?;
        writeln!(f, "Self-Copies:      {}", self.self_copies_filtered)?;
        writeln!(f, "Not Copied:       {}", self.orders_not_copied)?;
        writeln!(
            f,
            "Copies Placed:    {} (Destination Failures: {})",
            self.copies_placed, self.destination_failures
        )?;
        writeln!(f, "Ledger Entries:   {}", self.ledger_entries)?;
        writeln!(
            f,
            "Status:           {}",
            if self.is_running { "Running" } else { "Stopped" }
        )?;
        Ok(())
    }
}
