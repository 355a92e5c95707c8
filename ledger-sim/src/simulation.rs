//! Simulation orchestration layer
//!
//! Ties together store, executor, retry controller and worker pool into one
//! seeded run.
//!
//! # Example
//!
//! ```no_run
//! use ledger_sim::{Config, Simulation};
//!
//! #[tokio::main]
//! async fn main() -> ledger_sim::Result<()> {
//!     let config = Config::from_env()?;
//!     let simulation = Simulation::open(config)?;
//!     let summary = simulation.run().await?;
//!     println!("{} transfers committed", summary.report.committed());
//!     Ok(())
//! }
//! ```

use crate::{
    audit::{verify_ledger, LedgerAudit},
    executor::TransferExecutor,
    metrics::Metrics,
    pool::{PoolReport, WorkerPool},
    retry::RetryController,
    store::{open_store, LedgerStore},
    types::AccountId,
    Config, Result,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Result of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    /// Per-worker tallies
    pub report: PoolReport,
    /// Post-run verification
    pub audit: LedgerAudit,
}

/// A configured simulation over one ledger store
pub struct Simulation {
    store: Arc<dyn LedgerStore>,
    metrics: Metrics,
    config: Config,
    stop: Option<watch::Receiver<bool>>,
}

impl Simulation {
    /// Open the configured store
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config)?;
        Self::with_store(config, store)
    }

    /// Use an already opened store
    pub fn with_store(config: Config, store: Arc<dyn LedgerStore>) -> Result<Self> {
        Ok(Self {
            store,
            metrics: Metrics::new()?,
            config,
            stop: None,
        })
    }

    /// Let `stop` end the run early
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Store the simulation runs against
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Metrics recorded by the run
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Insert `A1..An` with the initial balance; existing accounts are kept
    pub fn seed(&self) -> Result<usize> {
        let sim = &self.config.simulation;
        tracing::info!(
            accounts = sim.num_accounts,
            initial_balance = sim.initial_balance,
            "Seeding accounts"
        );

        self.store
            .seed_accounts(&AccountId::sequence(sim.num_accounts), sim.initial_balance)
    }

    /// Seed, run every worker to completion, then audit
    pub async fn run(&self) -> Result<SimulationSummary> {
        self.seed()?;

        // Total before any transfer; a reused store may hold more than the seed
        let expected_total = self.store.snapshot_accounts()?.total();

        let retry =
            RetryController::new(self.config.retry.policy()).with_metrics(self.metrics.clone());
        let mut pool = WorkerPool::new(TransferExecutor::new(self.store.clone()), retry)
            .with_seed(self.config.simulation.seed);
        if let Some(stop) = &self.stop {
            pool = pool.with_stop_signal(stop.clone());
        }

        let report = pool
            .run(
                self.config.simulation.workers,
                self.config.simulation.transfers_per_worker,
            )
            .await;

        let audit = verify_ledger(self.store.as_ref(), expected_total)?;

        Ok(SimulationSummary { report, audit })
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
