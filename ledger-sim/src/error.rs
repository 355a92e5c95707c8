//! Error types for the transfer engine

use crate::types::AccountId;
use std::fmt;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer than two accounts available to transfer between
    #[error("Insufficient accounts: found {found}, need at least 2")]
    InsufficientAccounts {
        /// Accounts present in the snapshot
        found: usize,
    },

    /// Source balance cannot cover the transfer
    #[error("Insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account that would be overdrawn
        account: AccountId,
        /// Balance observed when the check failed
        balance: i64,
        /// Amount that was requested
        requested: i64,
    },

    /// Atomic unit lost a race against a concurrent writer
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Referenced account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Storage error (RocksDB, poisoned state, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (money conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fewer than two accounts
    InsufficientAccounts,
    /// Source could not cover the amount
    InsufficientFunds,
    /// Serialization failure against a concurrent writer
    Conflict,
    /// Anything else the store reports; never retried
    StoreFault,
}

impl ErrorKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientAccounts => "insufficient_accounts",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StoreFault => "store_fault",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InsufficientAccounts { .. } => ErrorKind::InsufficientAccounts,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Error::Conflict(_) => ErrorKind::Conflict,
            _ => ErrorKind::StoreFault,
        }
    }

    /// Whether a fresh snapshot might let the transfer succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::StoreFault
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain => {
                Error::Conflict(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}
