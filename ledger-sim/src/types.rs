//! Core types for the ledger
//!
//! Balances are plain signed integers in the smallest unit. Records are
//! serialized with bincode when persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequential ids `A1..An` used when seeding a simulation
    pub fn sequence(count: usize) -> Vec<AccountId> {
        (1..=count).map(|i| AccountId::new(format!("A{}", i))).collect()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Account with its current balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identity
    pub id: AccountId,

    /// Balance in the smallest unit
    pub balance: i64,
}

impl Account {
    /// Create account
    pub fn new(id: impl Into<AccountId>, balance: i64) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }
}

/// Committed transfer, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Position in commit order (starts at 1)
    pub sequence: u64,

    /// Unique transfer ID (UUIDv7 for time-ordering)
    pub transfer_id: Uuid,

    /// Debited account
    pub from: AccountId,

    /// Credited account
    pub to: AccountId,

    /// Amount moved, always positive
    pub amount: i64,

    /// Time the transfer was built
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            self.timestamp.to_rfc3339(),
            self.from,
            self.to,
            self.amount
        )
    }
}

/// Transfer picked by the generator, not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    /// Debited account
    pub from: AccountId,
    /// Credited account
    pub to: AccountId,
    /// Amount in `[1, from.balance]` as of the snapshot
    pub amount: i64,
}

/// Point-in-time view of every account, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    accounts: Vec<Account>,
}

impl LedgerSnapshot {
    /// Build a snapshot; accounts are sorted by id
    pub fn new(mut accounts: Vec<Account>) -> Self {
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Self { accounts }
    }

    /// Accounts in id order
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the ledger has no accounts
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Look up one account's balance
    pub fn balance_of(&self, id: &AccountId) -> Option<i64> {
        self.accounts
            .iter()
            .find(|account| &account.id == id)
            .map(|account| account.balance)
    }

    /// Sum of all balances
    pub fn total(&self) -> i128 {
        self.accounts.iter().map(|a| a.balance as i128).sum()
    }
}
