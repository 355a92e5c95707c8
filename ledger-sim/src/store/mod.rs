//! Ledger store abstraction
//!
//! The engine never mutates balances directly. Every change goes through
//! [`LedgerStore::run_atomic`]: the unit reads, debits, credits and appends
//! through a [`LedgerTxn`], and the store commits all of it or none of it.
//! Write-write conflicts with concurrent units on the same accounts are
//! detected at commit and reported as [`Error::Conflict`](crate::Error::Conflict).
//!
//! Transfer records are numbered inside the store's commit critical section,
//! so `list_transfers` returns them in commit order.

use crate::{
    types::{Account, AccountId, LedgerSnapshot, TransferRecord},
    Config, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

/// Operations available inside one atomic unit
pub trait LedgerTxn {
    /// Read every account as of the unit's consistent view (own writes included)
    fn snapshot_accounts(&mut self) -> Result<LedgerSnapshot>;

    /// Add `delta` to a balance and return the new balance.
    ///
    /// Fails with `InsufficientFunds` if the result would be negative and
    /// with `AccountNotFound` for an unknown account.
    fn adjust_balance(&mut self, id: &AccountId, delta: i64) -> Result<i64>;

    /// Stage a transfer record; its sequence number is assigned at commit
    fn append_transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// Body of an atomic unit
pub type AtomicUnit<'a> = dyn FnMut(&mut dyn LedgerTxn) -> Result<()> + 'a;

/// Persistent holder of balances and the transfer log
pub trait LedgerStore: Send + Sync {
    /// Insert accounts that do not exist yet; returns how many were inserted
    fn seed_accounts(&self, ids: &[AccountId], initial_balance: i64) -> Result<usize>;

    /// Consistent read of all accounts outside any unit
    fn snapshot_accounts(&self) -> Result<LedgerSnapshot>;

    /// Run `unit` and commit its writes atomically.
    ///
    /// Returns the transfer records the unit appended, numbered in commit
    /// order. If the unit fails nothing is written.
    fn run_atomic(&self, unit: &mut AtomicUnit<'_>) -> Result<Vec<TransferRecord>>;

    /// All accounts ordered by id
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// All transfer records in commit order
    fn list_transfers(&self) -> Result<Vec<TransferRecord>>;
}

/// Transfer staged inside a unit, waiting for a sequence number
#[derive(Debug, Clone)]
pub(crate) struct StagedTransfer {
    transfer_id: Uuid,
    from: AccountId,
    to: AccountId,
    amount: i64,
    timestamp: DateTime<Utc>,
}

impl StagedTransfer {
    pub(crate) fn new(
        from: &AccountId,
        to: &AccountId,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(crate::Error::InvariantViolation(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if from == to {
            return Err(crate::Error::InvariantViolation(format!(
                "transfer from {} to itself",
                from
            )));
        }

        Ok(Self {
            transfer_id: Uuid::now_v7(),
            from: from.clone(),
            to: to.clone(),
            amount,
            timestamp,
        })
    }

    pub(crate) fn into_record(self, sequence: u64) -> TransferRecord {
        TransferRecord {
            sequence,
            transfer_id: self.transfer_id,
            from: self.from,
            to: self.to,
            amount: self.amount,
            timestamp: self.timestamp,
        }
    }
}

/// Open the store selected by `config.backend`
pub fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        crate::config::StoreBackend::Memory => {
            tracing::info!("Using in-memory ledger store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb")]
        crate::config::StoreBackend::Rocksdb => Ok(Arc::new(RocksStore::open(config)?)),
        #[cfg(not(feature = "rocksdb"))]
        crate::config::StoreBackend::Rocksdb => Err(crate::Error::Config(
            "rocksdb backend requires the `rocksdb` feature".to_string(),
        )),
    }
}
