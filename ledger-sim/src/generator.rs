//! Random transfer selection
//!
//! Picks `(from, to, amount)` from a snapshot. The amount is bounded by the
//! balance *in the snapshot*, which may already be stale; the store rechecks
//! funds when the debit is applied.

use crate::{
    rng::RandomSource,
    types::{LedgerSnapshot, TransferIntent},
    Error, Result,
};

/// Stateless transfer generator
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferGenerator;

impl TransferGenerator {
    /// Create generator
    pub fn new() -> Self {
        Self
    }

    /// Pick a transfer from the snapshot.
    ///
    /// Source is uniform over all accounts, destination uniform over the
    /// others, amount uniform over `[1, source balance]`.
    pub fn generate<R>(&self, snapshot: &LedgerSnapshot, rng: &mut R) -> Result<TransferIntent>
    where
        R: RandomSource + ?Sized,
    {
        let accounts = snapshot.accounts();
        if accounts.len() < 2 {
            return Err(Error::InsufficientAccounts {
                found: accounts.len(),
            });
        }

        let from_idx = rng.pick_index(accounts.len());
        let from = &accounts[from_idx];

        if from.balance <= 0 {
            return Err(Error::InsufficientFunds {
                account: from.id.clone(),
                balance: from.balance,
                requested: 1,
            });
        }

        // Draw from the other n-1 slots and shift past the source
        let mut to_idx = rng.pick_index(accounts.len() - 1);
        if to_idx >= from_idx {
            to_idx += 1;
        }
        let to = &accounts[to_idx];

        let amount = rng.pick_between(1, from.balance);

        Ok(TransferIntent {
            from: from.id.clone(),
            to: to.id.clone(),
            amount,
        })
    }
}
