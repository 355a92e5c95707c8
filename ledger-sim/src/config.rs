//! Configuration for the simulator

use crate::retry::{BackoffRange, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Which store backs the ledger
    pub backend: StoreBackend,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// Workload configuration
    pub simulation: SimulationConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger-sim"),
            service_name: "ledger-sim".to_string(),
            backend: StoreBackend::default(),
            log_json: false,
            simulation: SimulationConfig::default(),
            retry: RetryConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Store implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process optimistic store, lost on exit
    Memory,
    /// RocksDB optimistic transactions under `data_dir`
    Rocksdb,
}

impl Default for StoreBackend {
    fn default() -> Self {
        if cfg!(feature = "rocksdb") {
            StoreBackend::Rocksdb
        } else {
            StoreBackend::Memory
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rocksdb" => Ok(StoreBackend::Rocksdb),
            other => Err(crate::Error::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Accounts seeded as `A1..An`
    pub num_accounts: usize,

    /// Starting balance for each seeded account
    pub initial_balance: i64,

    /// Concurrent workers
    pub workers: usize,

    /// Transfer attempts per worker
    pub transfers_per_worker: usize,

    /// Base seed for per-worker RNGs; entropy when absent
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_accounts: 5,
            initial_balance: 1000,
            workers: 5,
            transfers_per_worker: 20,
            seed: None,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first execution
    pub max_retries: u32,

    /// Lower bound of the backoff sleep (milliseconds, inclusive)
    pub backoff_min_ms: u64,

    /// Upper bound of the backoff sleep (milliseconds, exclusive)
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,     // 3 executions in total
            backoff_min_ms: 50,
            backoff_max_ms: 150,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: BackoffRange::new(
                Duration::from_millis(self.backoff_min_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_SIM_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("LEDGER_SIM_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Some(n) = env_parse("LEDGER_SIM_NUM_ACCOUNTS")? {
            config.simulation.num_accounts = n;
        }

        if let Some(n) = env_parse("LEDGER_SIM_WORKERS")? {
            config.simulation.workers = n;
        }

        if let Some(n) = env_parse("LEDGER_SIM_TRANSFERS_PER_WORKER")? {
            config.simulation.transfers_per_worker = n;
        }

        if let Some(seed) = env_parse("LEDGER_SIM_SEED")? {
            config.simulation.seed = Some(seed);
        }

        if let Some(n) = env_parse("LEDGER_SIM_MAX_RETRIES")? {
            config.retry.max_retries = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.simulation.initial_balance < 0 {
            return Err(crate::Error::Config(
                "initial_balance must not be negative".to_string(),
            ));
        }

        if self.retry.backoff_min_ms > self.retry.backoff_max_ms {
            return Err(crate::Error::Config(format!(
                "backoff_min_ms ({}) exceeds backoff_max_ms ({})",
                self.retry.backoff_min_ms, self.retry.backoff_max_ms
            )));
        }

        if self.backend == StoreBackend::Rocksdb && !cfg!(feature = "rocksdb") {
            return Err(crate::Error::Config(
                "rocksdb backend requires the `rocksdb` feature".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> crate::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "ledger-sim");
        assert_eq!(config.simulation.num_accounts, 5);
        assert_eq!(config.simulation.initial_balance, 1000);
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            backend = "memory"

            [simulation]
            workers = 8
            seed = 7

            [retry]
            backoff_max_ms = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.simulation.workers, 8);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.transfers_per_worker, 20);
        assert_eq!(config.retry.backoff_min_ms, 50);
        assert_eq!(config.retry.backoff_max_ms, 300);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.retry.backoff_min_ms = 200;
        config.retry.backoff_max_ms = 100;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("MEMORY".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff.min(), Duration::from_millis(50));
        assert_eq!(policy.backoff.max(), Duration::from_millis(150));
    }
}
