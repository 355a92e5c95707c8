//! Storage layer using RocksDB optimistic transactions
//!
//! # Column Families
//!
//! - `accounts` - Balances (key: account id, value: bincode `i64`)
//! - `transfers` - Append-only transfer log (key: big-endian sequence)
//!
//! Each unit runs in an `OptimisticTransaction` with a snapshot taken at
//! begin. Account reads inside the unit go through `get_for_update`, so a
//! concurrent commit on the same key makes our commit fail with `Busy`,
//! which maps to `Error::Conflict`.

use super::{AtomicUnit, LedgerStore, LedgerTxn, StagedTransfer};
use crate::{
    error::{Error, Result},
    types::{Account, AccountId, LedgerSnapshot, TransferRecord},
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, OptimisticTransactionOptions, Options, ReadOptions,
    SnapshotWithThreadMode, Transaction, WriteOptions,
};
use std::sync::Arc;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSFERS: &str = "transfers";

type Db = OptimisticTransactionDB<MultiThreaded>;
type DbTxn<'db> = Transaction<'db, Db>;

/// Ledger store backed by RocksDB
pub struct RocksStore {
    db: Db,

    /// Next transfer sequence; held across commit so log order is commit order
    next_sequence: Mutex<u64>,
}

impl RocksStore {
    /// Open or create database (creates the column families on first run)
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_transfers()),
        ];

        let db = Db::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_sequence = Self::last_sequence(&db)? + 1;

        tracing::info!(
            path = ?path,
            next_sequence,
            "Opened RocksDB ledger store"
        );

        Ok(Self {
            db,
            next_sequence: Mutex::new(next_sequence),
        })
    }

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Balances are hot and tiny, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transfers() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle<'a>(db: &'a Db, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
        db.cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn last_sequence(db: &Db) -> Result<u64> {
        let cf = Self::cf_handle(db, CF_TRANSFERS)?;

        if let Some(item) = db.iterator_cf(&cf, IteratorMode::End).next() {
            let (key, _) = item?;
            return decode_sequence(&key);
        }

        Ok(0)
    }

    fn begin(&self) -> DbTxn<'_> {
        let mut txn_opts = OptimisticTransactionOptions::new();
        txn_opts.set_snapshot(true);
        self.db.transaction_opt(&WriteOptions::default(), &txn_opts)
    }
}

impl LedgerStore for RocksStore {
    fn seed_accounts(&self, ids: &[AccountId], initial_balance: i64) -> Result<usize> {
        let cf = Self::cf_handle(&self.db, CF_ACCOUNTS)?;
        let txn = self.begin();
        let mut inserted = 0;

        for id in ids {
            let key = id.as_str().as_bytes();
            if txn.get_for_update_cf(&cf, key, true)?.is_none() {
                txn.put_cf(&cf, key, bincode::serialize(&initial_balance)?)?;
                inserted += 1;
            }
        }

        txn.commit()?;

        tracing::debug!(inserted, requested = ids.len(), "Seeded accounts");
        Ok(inserted)
    }

    fn snapshot_accounts(&self) -> Result<LedgerSnapshot> {
        let cf = Self::cf_handle(&self.db, CF_ACCOUNTS)?;
        let snapshot = self.db.snapshot();

        let mut accounts = Vec::new();
        for item in snapshot.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            accounts.push(decode_account(&key, &value)?);
        }

        Ok(LedgerSnapshot::new(accounts))
    }

    fn run_atomic(&self, unit: &mut AtomicUnit<'_>) -> Result<Vec<TransferRecord>> {
        let accounts_cf = Self::cf_handle(&self.db, CF_ACCOUNTS)?;
        let transfers_cf = Self::cf_handle(&self.db, CF_TRANSFERS)?;
        let txn = self.begin();

        let staged = {
            let snapshot = txn.snapshot();
            let mut handle = RocksTxn {
                txn: &txn,
                snapshot: &snapshot,
                accounts_cf: &accounts_cf,
                transfers: Vec::new(),
            };

            // Dropping `txn` on error rolls the unit back
            unit(&mut handle)?;
            handle.transfers
        };

        let mut next_sequence = self.next_sequence.lock();
        let mut records = Vec::with_capacity(staged.len());

        for (offset, transfer) in staged.into_iter().enumerate() {
            let record = transfer.into_record(*next_sequence + offset as u64);
            txn.put_cf(
                &transfers_cf,
                record.sequence.to_be_bytes(),
                bincode::serialize(&record)?,
            )?;
            records.push(record);
        }

        txn.commit()?;
        *next_sequence += records.len() as u64;

        Ok(records)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.snapshot_accounts()?.accounts().to_vec())
    }

    fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        let cf = Self::cf_handle(&self.db, CF_TRANSFERS)?;

        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("next_sequence", &*self.next_sequence.lock())
            .finish()
    }
}

struct RocksTxn<'t, 'db> {
    txn: &'t DbTxn<'db>,
    snapshot: &'t SnapshotWithThreadMode<'t, DbTxn<'db>>,
    accounts_cf: &'t Arc<BoundColumnFamily<'db>>,
    transfers: Vec<StagedTransfer>,
}

impl RocksTxn<'_, '_> {
    fn read_opts(&self) -> ReadOptions {
        let mut opts = ReadOptions::default();
        opts.set_snapshot(self.snapshot);
        opts
    }
}

impl LedgerTxn for RocksTxn<'_, '_> {
    fn snapshot_accounts(&mut self) -> Result<LedgerSnapshot> {
        let mut accounts = Vec::new();

        for item in self
            .txn
            .iterator_cf_opt(self.accounts_cf, self.read_opts(), IteratorMode::Start)
        {
            let (key, value) = item?;
            accounts.push(decode_account(&key, &value)?);
        }

        Ok(LedgerSnapshot::new(accounts))
    }

    fn adjust_balance(&mut self, id: &AccountId, delta: i64) -> Result<i64> {
        let key = id.as_str().as_bytes();

        let raw = self
            .txn
            .get_for_update_cf_opt(self.accounts_cf, key, true, &self.read_opts())?
            .ok_or_else(|| Error::AccountNotFound(id.clone()))?;
        let current: i64 = bincode::deserialize(&raw)?;

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

        self.txn
            .put_cf(self.accounts_cf, key, bincode::serialize(&updated)?)?;
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

fn decode_account(key: &[u8], value: &[u8]) -> Result<Account> {
    let id = std::str::from_utf8(key)
        .map_err(|e| Error::Storage(format!("Invalid account key: {}", e)))?;
    let balance: i64 = bincode::deserialize(value)?;
    Ok(Account::new(id, balance))
}

fn decode_sequence(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Storage(format!("Invalid transfer key length {}", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
