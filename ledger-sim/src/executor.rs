//! One transfer, one atomic unit
//!
//! Snapshot, generation, debit, credit and record append all run inside a
//! single [`LedgerStore::run_atomic`] call. Nothing is cached between
//! executions: each call starts from a fresh snapshot.

use crate::{
    generator::TransferGenerator,
    rng::RandomSource,
    store::{LedgerStore, LedgerTxn},
    types::{TransferIntent, TransferRecord},
    Error, Result,
};
use chrono::Utc;
use std::sync::Arc;

/// Executes random transfers against a ledger store
#[derive(Clone)]
pub struct TransferExecutor {
    store: Arc<dyn LedgerStore>,
    generator: TransferGenerator,
}

impl TransferExecutor {
    /// Create executor over `store`
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            generator: TransferGenerator::new(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Generate and commit one transfer.
    ///
    /// Errors keep their classification: generator failures come back as
    /// `InsufficientAccounts`/`InsufficientFunds`, a lost race as `Conflict`,
    /// anything else the store reports as a store fault.
    pub fn execute<R>(&self, rng: &mut R) -> Result<TransferRecord>
    where
        R: RandomSource + ?Sized,
    {
        let generator = self.generator;

        let mut records = self.store.run_atomic(&mut |txn| {
            let snapshot = txn.snapshot_accounts()?;
            let intent = generator.generate(&snapshot, &mut *rng)?;
            apply(txn, &intent)
        })?;

        let record = records.pop().ok_or_else(|| {
            Error::InvariantViolation("committed unit produced no transfer record".to_string())
        })?;

        tracing::trace!(
            sequence = record.sequence,
            from = %record.from,
            to = %record.to,
            amount = record.amount,
            "Transfer committed"
        );

        Ok(record)
    }
}

/// Debit, credit and log one intent inside an open unit
fn apply(txn: &mut dyn LedgerTxn, intent: &TransferIntent) -> Result<()> {
    txn.adjust_balance(&intent.from, -intent.amount)?;
    txn.adjust_balance(&intent.to, intent.amount)?;
    txn.append_transfer(&intent.from, &intent.to, intent.amount, Utc::now())
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor").finish_non_exhaustive()
    }
}
