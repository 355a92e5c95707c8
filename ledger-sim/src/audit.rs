//! Post-run ledger verification
//!
//! Replays nothing; it checks the store's final state against the ledger
//! invariants: total funds conserved, no negative balance, transfer log in
//! strictly increasing commit order, every record naming existing accounts
//! with a positive amount.

use crate::{
    store::LedgerStore,
    types::Account,
    Error, Result,
};
use std::collections::HashSet;

/// Summary of a verified ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Accounts present
    pub accounts: usize,
    /// Sum of all balances
    pub total_balance: i128,
    /// Transfer records in the log
    pub transfers: usize,
    /// Sum of all transferred amounts
    pub volume: i128,
}

/// Check the store against `expected_total`
pub fn verify_ledger(store: &dyn LedgerStore, expected_total: i128) -> Result<LedgerAudit> {
    let accounts = store.list_accounts()?;
    let transfers = store.list_transfers()?;

    let total_balance: i128 = accounts.iter().map(|a| a.balance as i128).sum();
    if total_balance != expected_total {
        return Err(Error::InvariantViolation(format!(
            "total balance {} differs from expected {}",
            total_balance, expected_total
        )));
    }

    if let Some(Account { id, balance }) = accounts.iter().find(|a| a.balance < 0) {
        return Err(Error::InvariantViolation(format!(
            "account {} has negative balance {}",
            id, balance
        )));
    }

    let known: HashSet<_> = accounts.iter().map(|a| &a.id).collect();
    let mut previous = 0u64;
    let mut volume = 0i128;

    for record in &transfers {
        if record.sequence <= previous {
            return Err(Error::InvariantViolation(format!(
                "transfer sequence {} follows {}",
                record.sequence, previous
            )));
        }
        previous = record.sequence;

        if record.amount <= 0 {
            return Err(Error::InvariantViolation(format!(
                "transfer {} has non-positive amount {}",
                record.sequence, record.amount
            )));
        }

        for id in [&record.from, &record.to] {
            if !known.contains(id) {
                return Err(Error::InvariantViolation(format!(
                    "transfer {} references unknown account {}",
                    record.sequence, id
                )));
            }
        }

        volume += record.amount as i128;
    }

    let audit = LedgerAudit {
        accounts: accounts.len(),
        total_balance,
        transfers: transfers.len(),
        volume,
    };

    tracing::info!(
        accounts = audit.accounts,
        total_balance = %audit.total_balance,
        transfers = audit.transfers,
        volume = %audit.volume,
        "Ledger audit passed"
    );

    Ok(audit)
}
