//! Concurrent transfer workers
//!
//! `run` spawns one task per worker into a [`JoinSet`] and waits for all of
//! them. Workers share nothing but the store; a failed request is logged
//! and counted and the worker moves on to its next attempt.

use crate::{
    executor::TransferExecutor,
    retry::{Outcome, RetryController},
    rng::worker_rng,
};
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Tally for one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker identity (0-based)
    pub worker_id: usize,
    /// Requests run
    pub attempts: usize,
    /// Requests that committed
    pub committed: usize,
    /// Requests that spent their retry budget
    pub exhausted: usize,
    /// Requests ended by a store fault
    pub faulted: usize,
    /// Worker saw the stop signal before finishing its budget
    pub stopped_early: bool,
}

impl WorkerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }
}

/// Tally for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Per-worker results ordered by worker id
    pub workers: Vec<WorkerReport>,
    /// Worker tasks that panicked or were cancelled
    pub lost_workers: usize,
}

impl PoolReport {
    /// Requests run across all workers
    pub fn attempts(&self) -> usize {
        self.workers.iter().map(|w| w.attempts).sum()
    }

    /// Committed transfers across all workers
    pub fn committed(&self) -> usize {
        self.workers.iter().map(|w| w.committed).sum()
    }

    /// Exhausted requests across all workers
    pub fn exhausted(&self) -> usize {
        self.workers.iter().map(|w| w.exhausted).sum()
    }

    /// Faulted requests across all workers
    pub fn faulted(&self) -> usize {
        self.workers.iter().map(|w| w.faulted).sum()
    }
}

/// Pool of transfer workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    executor: TransferExecutor,
    retry: RetryController,
    seed: Option<u64>,
    stop: Option<watch::Receiver<bool>>,
}

impl WorkerPool {
    /// Create pool
    pub fn new(executor: TransferExecutor, retry: RetryController) -> Self {
        Self {
            executor,
            retry,
            seed: None,
            stop: None,
        }
    }

    /// Seed worker RNGs from `seed + worker_id`
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Stop starting new requests once `stop` reads `true`
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Run `worker_count` workers with `attempts_per_worker` requests each
    /// and wait for all of them.
    pub async fn run(&self, worker_count: usize, attempts_per_worker: usize) -> PoolReport {
        tracing::info!(
            workers = worker_count,
            attempts_per_worker,
            max_retries = self.retry.policy().max_retries,
            "Starting transfer workers"
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                executor: self.executor.clone(),
                retry: self.retry.clone(),
                rng: worker_rng(self.seed, worker_id),
                stop: self.stop.clone(),
            };
            tasks.spawn(worker.run(attempts_per_worker));
        }

        let mut report = PoolReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(worker) => report.workers.push(worker),
                Err(err) => {
                    tracing::error!(error = %err, "Worker task did not finish");
                    report.lost_workers += 1;
                }
            }
        }
        report.workers.sort_by_key(|w| w.worker_id);

        tracing::info!(
            attempts = report.attempts(),
            committed = report.committed(),
            exhausted = report.exhausted(),
            faulted = report.faulted(),
            "All transfer workers finished"
        );

        report
    }
}

struct Worker {
    id: usize,
    executor: TransferExecutor,
    retry: RetryController,
    rng: StdRng,
    stop: Option<watch::Receiver<bool>>,
}

impl Worker {
    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map_or(false, |stop| *stop.borrow())
    }

    async fn run(mut self, attempts: usize) -> WorkerReport {
        let mut report = WorkerReport::new(self.id);

        for attempt in 0..attempts {
            if self.stop_requested() {
                tracing::info!(worker = self.id, attempt, "Stop requested, worker exiting");
                report.stopped_early = true;
                break;
            }

            let executor = &self.executor;
            let outcome = self
                .retry
                .attempt(&mut self.rng, |rng| executor.execute(rng))
                .await;
            report.attempts += 1;

            match outcome {
                Outcome::Committed { record, retries } => {
                    report.committed += 1;
                    tracing::debug!(
                        worker = self.id,
                        attempt,
                        retries,
                        sequence = record.sequence,
                        from = %record.from,
                        to = %record.to,
                        amount = record.amount,
                        "Transfer committed"
                    );
                }
                Outcome::Exhausted {
                    retries,
                    last_error,
                } => {
                    report.exhausted += 1;
                    tracing::warn!(
                        worker = self.id,
                        attempt,
                        retries,
                        kind = %last_error.kind(),
                        error = %last_error,
                        "Transfer failed after {} retries",
                        retries
                    );
                }
                Outcome::Faulted { retries, error } => {
                    report.faulted += 1;
                    tracing::error!(
                        worker = self.id,
                        attempt,
                        retries,
                        kind = %error.kind(),
                        error = %error,
                        "Transfer aborted by store fault"
                    );
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::{LedgerStore, MemoryStore};
    use crate::types::AccountId;
    use std::sync::Arc;

    fn pool(accounts: usize, balance: i64) -> (WorkerPool, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_accounts(&AccountId::sequence(accounts), balance)
            .unwrap();
        let executor = TransferExecutor::new(store.clone());
        let pool = WorkerPool::new(executor, RetryController::new(RetryPolicy::default()))
            .with_seed(Some(7));
        (pool, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_worker_runs_its_budget() {
        let (pool, store) = pool(4, 500);

        let report = pool.run(3, 6).await;

        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.lost_workers, 0);
        assert!(report.workers.iter().all(|w| w.attempts == 6));
        assert_eq!(
            report.committed(),
            store.list_transfers().unwrap().len()
        );
        assert_eq!(store.snapshot_accounts().unwrap().total(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_workers_returns_empty_report() {
        let (pool, _store) = pool(2, 10);
        let report = pool.run(0, 10).await;
        assert_eq!(report, PoolReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_prevents_new_requests() {
        let (pool, store) = pool(3, 100);
        let (tx, rx) = watch::channel(true);
        let pool = pool.with_stop_signal(rx);

        let report = pool.run(2, 50).await;

        assert!(report.workers.iter().all(|w| w.stopped_early));
        assert_eq!(report.attempts(), 0);
        assert!(store.list_transfers().unwrap().is_empty());
        drop(tx);
    }
}
