//! Ledger Sim
//!
//! Concurrent random transfers over a shared ledger, used to exercise
//! contention, transactional integrity and retry behavior.
//!
//! # Architecture
//!
//! - **Store**: balances + append-only transfer log behind an optimistic
//!   atomic unit (in-memory or RocksDB)
//! - **Generator**: picks `(from, to, amount)` from a snapshot
//! - **Executor**: one transfer as one atomic unit
//! - **Retry**: bounded retries with randomized backoff
//! - **Pool**: N workers x M requests, joined
//!
//! # Invariants
//!
//! - Money conservation: Σ(balances) is constant across committed transfers
//! - No committed transfer drives a balance negative
//! - Debit, credit and record commit together or not at all
//! - Transfer log is in commit order

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod store;
pub mod generator;
pub mod executor;
pub mod retry;
pub mod pool;
pub mod audit;
pub mod rng;
pub mod error;
pub mod config;
pub mod metrics;
pub mod simulation;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{Account, AccountId, LedgerSnapshot, TransferIntent, TransferRecord};
pub use store::{LedgerStore, LedgerTxn, MemoryStore};
#[cfg(feature = "rocksdb")]
pub use store::RocksStore;
pub use generator::TransferGenerator;
pub use executor::TransferExecutor;
pub use retry::{BackoffRange, Outcome, RetryController, RetryPolicy, RetryState};
pub use pool::{PoolReport, WorkerPool, WorkerReport};
pub use simulation::{Simulation, SimulationSummary};
pub use config::Config;
