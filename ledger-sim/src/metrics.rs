//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the transfer engine.
//!
//! # Metrics
//!
//! - `ledger_sim_transfers_committed_total` - Transfers committed
//! - `ledger_sim_transfer_conflicts_total` - Executions lost to a concurrent writer
//! - `ledger_sim_insufficient_funds_total` - Executions rejected for funds
//! - `ledger_sim_insufficient_accounts_total` - Executions with fewer than 2 accounts
//! - `ledger_sim_store_faults_total` - Executions failed by a store fault
//! - `ledger_sim_transfer_retries_total` - Backoff sleeps taken
//! - `ledger_sim_attempts_exhausted_total` - Requests that spent their retry budget
//! - `ledger_sim_transfer_attempt_duration_seconds` - Histogram of execution latencies
//!
//! Each collector owns its registry, so several can live in one process.

use crate::{types::TransferRecord, ErrorKind, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transfers committed
    pub committed: IntCounter,

    /// Conflicts at commit
    pub conflicts: IntCounter,

    /// Insufficient funds (generation or commit time)
    pub insufficient_funds: IntCounter,

    /// Fewer than two accounts
    pub insufficient_accounts: IntCounter,

    /// Store faults
    pub store_faults: IntCounter,

    /// Backoff sleeps
    pub retries: IntCounter,

    /// Exhausted requests
    pub exhausted: IntCounter,

    /// Execution duration histogram
    pub attempt_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let committed = counter(
            "ledger_sim_transfers_committed_total",
            "Total number of transfers committed",
        )?;
        let conflicts = counter(
            "ledger_sim_transfer_conflicts_total",
            "Executions that lost a write conflict",
        )?;
        let insufficient_funds = counter(
            "ledger_sim_insufficient_funds_total",
            "Executions rejected for insufficient funds",
        )?;
        let insufficient_accounts = counter(
            "ledger_sim_insufficient_accounts_total",
            "Executions with fewer than two accounts",
        )?;
        let store_faults = counter(
            "ledger_sim_store_faults_total",
            "Executions failed by a store fault",
        )?;
        let retries = counter(
            "ledger_sim_transfer_retries_total",
            "Backoff sleeps taken before re-executing",
        )?;
        let exhausted = counter(
            "ledger_sim_attempts_exhausted_total",
            "Transfer requests that spent their retry budget",
        )?;

        let attempt_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_sim_transfer_attempt_duration_seconds",
                "Histogram of single execution latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]),
        )?;
        registry.register(Box::new(attempt_duration.clone()))?;

        Ok(Self {
            committed,
            conflicts,
            insufficient_funds,
            insufficient_accounts,
            store_faults,
            retries,
            exhausted,
            attempt_duration,
            registry,
        })
    }

    /// Record one executor run
    pub fn record_execution(&self, result: &Result<TransferRecord>, elapsed: Duration) {
        self.attempt_duration.observe(elapsed.as_secs_f64());

        match result {
            Ok(_) => self.committed.inc(),
            Err(err) => match err.kind() {
                ErrorKind::Conflict => self.conflicts.inc(),
                ErrorKind::InsufficientFunds => self.insufficient_funds.inc(),
                ErrorKind::InsufficientAccounts => self.insufficient_accounts.inc(),
                ErrorKind::StoreFault => self.store_faults.inc(),
            },
        }
    }

    /// Record a backoff sleep
    pub fn record_retry(&self) {
        self.retries.inc();
    }

    /// Record an exhausted request
    pub fn record_exhausted(&self) {
        self.exhausted.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every collector
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("committed", &self.committed.get())
            .field("conflicts", &self.conflicts.get())
            .field("exhausted", &self.exhausted.get())
            .finish_non_exhaustive()
    }
}
