//! In-process optimistic ledger store
//!
//! Each account carries a version bumped on every committed write. A unit
//! works on private copies and remembers the version of every account it
//! read; commit takes the write lock, checks the versions of the accounts it
//! wrote, then applies. A mismatch means another unit committed first and
//! the whole unit is dropped.

use super::{AtomicUnit, LedgerStore, LedgerTxn, StagedTransfer};
use crate::{
    types::{Account, AccountId, LedgerSnapshot, TransferRecord},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy)]
struct Slot {
    balance: i64,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, Slot>,
    transfers: Vec<TransferRecord>,
}

/// Ledger store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn seed_accounts(&self, ids: &[AccountId], initial_balance: i64) -> Result<usize> {
        let mut state = self.state.write();
        let mut inserted = 0;

        for id in ids {
            if !state.accounts.contains_key(id) {
                state.accounts.insert(
                    id.clone(),
                    Slot {
                        balance: initial_balance,
                        version: 0,
                    },
                );
                inserted += 1;
            }
        }

        tracing::debug!(inserted, requested = ids.len(), "Seeded accounts");
        Ok(inserted)
    }

    fn snapshot_accounts(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::new(self.list_accounts()?))
    }

    fn run_atomic(&self, unit: &mut AtomicUnit<'_>) -> Result<Vec<TransferRecord>> {
        let mut txn = MemoryTxn {
            state: &self.state,
            observed: HashMap::new(),
            staged: BTreeMap::new(),
            transfers: Vec::new(),
        };

        unit(&mut txn)?;

        txn.commit()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read();
        Ok(state
            .accounts
            .iter()
            .map(|(id, slot)| Account::new(id.clone(), slot.balance))
            .collect())
    }

    fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        Ok(self.state.read().transfers.clone())
    }
}

struct MemoryTxn<'a> {
    state: &'a RwLock<State>,
    /// First-read value of each touched account
    observed: HashMap<AccountId, Slot>,
    /// New balances written by this unit
    staged: BTreeMap<AccountId, i64>,
    transfers: Vec<StagedTransfer>,
}

impl MemoryTxn<'_> {
    fn observe(&mut self, id: &AccountId) -> Result<Slot> {
        if let Some(slot) = self.observed.get(id) {
            return Ok(*slot);
        }

        let slot = self
            .state
            .read()
            .accounts
            .get(id)
            .copied()
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;

        self.observed.insert(id.clone(), slot);
        Ok(slot)
    }

    fn commit(self) -> Result<Vec<TransferRecord>> {
        let mut state = self.state.write();

        for id in self.staged.keys() {
            let current = state
                .accounts
                .get(id)
                .ok_or_else(|| Error::AccountNotFound(id.clone()))?;
            let seen = self.observed[id];

            if current.version != seen.version {
                return Err(Error::Conflict(format!(
                    "account {} changed (version {} -> {})",
                    id, seen.version, current.version
                )));
            }
        }

        for (id, balance) in self.staged {
            if let Some(slot) = state.accounts.get_mut(&id) {
                slot.balance = balance;
                slot.version += 1;
            }
        }

        let mut records = Vec::with_capacity(self.transfers.len());
        for staged in self.transfers {
            let record = staged.into_record(state.transfers.len() as u64 + 1);
            state.transfers.push(record.clone());
            records.push(record);
        }

        Ok(records)
    }
}

impl LedgerTxn for MemoryTxn<'_> {
    fn snapshot_accounts(&mut self) -> Result<LedgerSnapshot> {
        let current: Vec<(AccountId, Slot)> = {
            let state = self.state.read();
            state
                .accounts
                .iter()
                .map(|(id, slot)| (id.clone(), *slot))
                .collect()
        };

        let mut accounts = Vec::with_capacity(current.len());
        for (id, slot) in current {
            let seen = *self.observed.entry(id.clone()).or_insert(slot);
            let balance = self.staged.get(&id).copied().unwrap_or(seen.balance);
            accounts.push(Account::new(id, balance));
        }

        Ok(LedgerSnapshot::new(accounts))
    }

    fn adjust_balance(&mut self, id: &AccountId, delta: i64) -> Result<i64> {
        let seen = self.observe(id)?;
        let current = self.staged.get(id).copied().unwrap_or(seen.balance);

        let updated = current.checked_add(delta).ok_or_else(|| {
            Error::InvariantViolation(format!("balance overflow on {}", id))
        })?;

        if updated < 0 {
            return Err(Error::InsufficientFunds {
                account: id.clone(),
                balance: current,
                requested: -delta,
            });
        }

        self.staged.insert(id.clone(), updated);
        Ok(updated)
    }

    fn append_transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.transfers
            .push(StagedTransfer::new(from, to, amount, timestamp)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(balances: &[(&str, i64)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, balance) in balances {
            store.seed_accounts(&[AccountId::new(*id)], *balance).unwrap();
        }
        store
    }

    fn transfer(txn: &mut dyn LedgerTxn, from: &str, to: &str, amount: i64) -> Result<()> {
        let (from, to) = (AccountId::new(from), AccountId::new(to));
        txn.adjust_balance(&from, -amount)?;
        txn.adjust_balance(&to, amount)?;
        txn.append_transfer(&from, &to, amount, Utc::now())
    }

    #[test]
    fn test_seed_is_insert_or_ignore() {
        let store = MemoryStore::new();
        let ids = AccountId::sequence(3);

        assert_eq!(store.seed_accounts(&ids, 1000).unwrap(), 3);
        assert_eq!(store.seed_accounts(&ids, 5).unwrap(), 0);
        assert!(store.list_accounts().unwrap().iter().all(|a| a.balance == 1000));
    }

    #[test]
    fn test_commit_applies_everything() {
        let store = seeded(&[("A1", 100), ("A2", 0)]);

        let records = store
            .run_atomic(&mut |txn| transfer(txn, "A1", "A2", 40))
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
        let snap = store.snapshot_accounts().unwrap();
        assert_eq!(snap.balance_of(&"A1".into()), Some(60));
        assert_eq!(snap.balance_of(&"A2".into()), Some(40));
        assert_eq!(store.list_transfers().unwrap(), records);
    }

    #[test]
    fn test_negative_balance_rejected_without_writes() {
        let store = seeded(&[("A1", 10), ("A2", 0)]);

        let err = store
            .run_atomic(&mut |txn| transfer(txn, "A1", "A2", 11))
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientFunds { balance: 10, requested: 11, .. }));
        assert_eq!(store.snapshot_accounts().unwrap().total(), 10);
        assert!(store.list_transfers().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let store = seeded(&[("A1", 10)]);

        let err = store
            .run_atomic(&mut |txn| transfer(txn, "A1", "ZZ", 1))
            .unwrap_err();

        assert!(matches!(err, Error::AccountNotFound(ref id) if id.as_str() == "ZZ"));
        assert_eq!(store.snapshot_accounts().unwrap().balance_of(&"A1".into()), Some(10));
    }

    #[test]
    fn test_interleaved_writer_causes_conflict() {
        let store = seeded(&[("A1", 100), ("A2", 100), ("A3", 100)]);

        let err = store
            .run_atomic(&mut |txn| {
                let snap = txn.snapshot_accounts()?;
                assert_eq!(snap.total(), 300);
                txn.adjust_balance(&"A1".into(), -50)?;

                // Another unit commits on A2 before this one does
                store.run_atomic(&mut |inner| transfer(inner, "A2", "A3", 10))?;

                txn.adjust_balance(&"A2".into(), 50)?;
                txn.append_transfer(&"A1".into(), &"A2".into(), 50, Utc::now())
            })
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));

        let snap = store.snapshot_accounts().unwrap();
        assert_eq!(snap.balance_of(&"A1".into()), Some(100));
        assert_eq!(snap.balance_of(&"A2".into()), Some(90));
        assert_eq!(snap.balance_of(&"A3".into()), Some(110));
        assert_eq!(store.list_transfers().unwrap().len(), 1);
    }

    #[test]
    fn test_disjoint_units_do_not_conflict() {
        let store = seeded(&[("A1", 100), ("A2", 100), ("A3", 100), ("A4", 100)]);

        store
            .run_atomic(&mut |txn| {
                txn.adjust_balance(&"A1".into(), -5)?;
                store.run_atomic(&mut |inner| transfer(inner, "A3", "A4", 7))?;
                txn.adjust_balance(&"A2".into(), 5)?;
                txn.append_transfer(&"A1".into(), &"A2".into(), 5, Utc::now())
            })
            .unwrap();

        let records = store.list_transfers().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].from.as_str(), "A3");
        assert_eq!(records[1].from.as_str(), "A1");
        assert_eq!(records[1].sequence, 2);
    }
}
