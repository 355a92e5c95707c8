//! Bounded retry with randomized backoff
//!
//! Each logical transfer walks a small state machine:
//!
//! ```text
//! Pending -> Executing -> Committed
//!                |-----> Retrying -> (sleep) -> Executing
//!                |-----> Exhausted   (retry budget spent)
//!                '-----> Faulted     (store fault, never retried)
//! ```
//!
//! `Conflict`, `InsufficientFunds` and `InsufficientAccounts` are retryable
//! since a fresh snapshot may resolve them. With `max_retries = n` an
//! operation that keeps failing runs `n + 1` times.

use crate::{metrics::Metrics, rng::RandomSource, types::TransferRecord, Error, Result};
use std::time::{Duration, Instant};

/// Range the backoff sleep is drawn from, `[min, max)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffRange {
    min: Duration,
    max: Duration,
}

impl BackoffRange {
    /// Create range; an inverted range collapses to `min`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Lower bound (inclusive)
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound (exclusive)
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw one delay
    pub fn sample<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Duration {
        let low = self.min.as_millis() as i64;
        let high = self.max.as_millis() as i64;

        if high <= low {
            return self.min;
        }

        Duration::from_millis(rng.pick_between(low, high - 1) as u64)
    }
}

impl Default for BackoffRange {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(150))
    }
}

/// Retry budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first execution
    pub max_retries: u32,
    /// Sleep between executions
    pub backoff: BackoffRange,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffRange::default(),
        }
    }
}

/// State of one logical transfer request
#[derive(Debug)]
pub enum RetryState {
    /// Not started
    Pending,
    /// About to run the executor
    Executing {
        /// Retries consumed so far
        retries: u32,
    },
    /// Failed with a retryable error, waiting out the backoff
    Retrying {
        /// Retries consumed before this backoff
        retries: u32,
        /// Error that caused the retry
        last_error: Error,
    },
    /// Transfer committed
    Committed {
        /// Committed record
        record: TransferRecord,
        /// Retries it took
        retries: u32,
    },
    /// Retry budget spent
    Exhausted {
        /// Retries consumed (equals the budget)
        retries: u32,
        /// Error of the final execution
        last_error: Error,
    },
    /// Store fault, retries not attempted
    Faulted {
        /// Retries consumed before the fault
        retries: u32,
        /// The fault
        error: Error,
    },
}

impl RetryState {
    /// `Pending -> Executing`
    pub fn start(self) -> Self {
        match self {
            RetryState::Pending => RetryState::Executing { retries: 0 },
            other => other,
        }
    }

    /// Feed the result of an execution. Only meaningful in `Executing`.
    pub fn on_result(self, result: Result<TransferRecord>, max_retries: u32) -> Self {
        let retries = match self {
            RetryState::Executing { retries } => retries,
            other => return other,
        };

        match result {
            Ok(record) => RetryState::Committed { record, retries },
            Err(error) if !error.is_retryable() => RetryState::Faulted { retries, error },
            Err(last_error) if retries < max_retries => RetryState::Retrying {
                retries,
                last_error,
            },
            Err(last_error) => RetryState::Exhausted {
                retries,
                last_error,
            },
        }
    }

    /// `Retrying -> Executing`, spending one retry
    pub fn resume(self) -> Self {
        match self {
            RetryState::Retrying { retries, .. } => RetryState::Executing {
                retries: retries + 1,
            },
            other => other,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Committed { .. } | RetryState::Exhausted { .. } | RetryState::Faulted { .. }
        )
    }
}

/// Final result of one logical transfer request
#[derive(Debug)]
pub enum Outcome {
    /// Transfer committed
    Committed {
        /// Committed record
        record: TransferRecord,
        /// Retries it took
        retries: u32,
    },
    /// Gave up after the retry budget
    Exhausted {
        /// Retries consumed
        retries: u32,
        /// Error of the final execution
        last_error: Error,
    },
    /// Store fault ended the request immediately
    Faulted {
        /// Retries consumed before the fault
        retries: u32,
        /// The fault
        error: Error,
    },
}

impl Outcome {
    /// Whether the transfer committed
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }

    /// Retries consumed
    pub fn retries(&self) -> u32 {
        match self {
            Outcome::Committed { retries, .. }
            | Outcome::Exhausted { retries, .. }
            | Outcome::Faulted { retries, .. } => *retries,
        }
    }

    /// Terminal error, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Committed { .. } => None,
            Outcome::Exhausted { last_error, .. } => Some(last_error),
            Outcome::Faulted { error, .. } => Some(error),
        }
    }
}

/// Drives the retry state machine for one request at a time
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
    metrics: Option<Metrics>,
}

impl RetryController {
    /// Create controller
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Record attempt results into `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it commits, faults or spends the retry budget.
    ///
    /// The same `rng` feeds the operation and the backoff draws. The only
    /// suspension point is the backoff sleep.
    pub async fn attempt<R, F>(&self, rng: &mut R, mut operation: F) -> Outcome
    where
        R: RandomSource + ?Sized,
        F: FnMut(&mut R) -> Result<TransferRecord>,
    {
        let mut state = RetryState::Pending;

        loop {
            state = match state {
                RetryState::Pending => RetryState::Pending.start(),

                RetryState::Executing { retries } => {
                    let started = Instant::now();
                    let result = operation(rng);

                    if let Some(metrics) = &self.metrics {
                        metrics.record_execution(&result, started.elapsed());
                    }

                    RetryState::Executing { retries }.on_result(result, self.policy.max_retries)
                }

                RetryState::Retrying {
                    retries,
                    last_error,
                } => {
                    let delay = self.policy.backoff.sample(rng);

                    tracing::debug!(
                        retries,
                        kind = %last_error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Transfer attempt failed, backing off"
                    );

                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }

                    tokio::time::sleep(delay).await;

                    RetryState::Retrying {
                        retries,
                        last_error,
                    }
                    .resume()
                }

                RetryState::Committed { record, retries } => {
                    return Outcome::Committed { record, retries };
                }

                RetryState::Exhausted {
                    retries,
                    last_error,
                } => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_exhausted();
                    }
                    return Outcome::Exhausted {
                        retries,
                        last_error,
                    };
                }

                RetryState::Faulted { retries, error } => {
                    return Outcome::Faulted { retries, error };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::testing::ScriptedSource;
    use crate::ErrorKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn record() -> TransferRecord {
        TransferRecord {
            sequence: 1,
            transfer_id: Uuid::now_v7(),
            from: "A1".into(),
            to: "A2".into(),
            amount: 1,
            timestamp: Utc::now(),
        }
    }

    fn conflict() -> Error {
        Error::Conflict("busy".into())
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: BackoffRange::default(),
        }
    }

    #[test]
    fn test_transition_table() {
        let executing = RetryState::Pending.start();
        assert!(matches!(executing, RetryState::Executing { retries: 0 }));

        let retrying = executing.on_result(Err(conflict()), 1);
        assert!(matches!(retrying, RetryState::Retrying { retries: 0, .. }));

        let executing = retrying.resume();
        assert!(matches!(executing, RetryState::Executing { retries: 1 }));

        let exhausted = executing.on_result(Err(conflict()), 1);
        assert!(matches!(exhausted, RetryState::Exhausted { retries: 1, .. }));
        assert!(exhausted.is_terminal());
    }

    #[test]
    fn test_store_fault_is_terminal_with_budget_left() {
        let state = RetryState::Executing { retries: 0 }
            .on_result(Err(Error::Storage("disk".into())), 10);
        assert!(matches!(state, RetryState::Faulted { retries: 0, .. }));
    }

    #[test]
    fn test_zero_budget_exhausts_immediately() {
        let state = RetryState::Executing { retries: 0 }.on_result(Err(conflict()), 0);
        assert!(matches!(state, RetryState::Exhausted { retries: 0, .. }));
    }

    #[test]
    fn test_terminal_states_ignore_input() {
        let committed = RetryState::Executing { retries: 2 }.on_result(Ok(record()), 5);
        let still = committed.on_result(Err(conflict()), 5).resume().start();
        assert!(matches!(still, RetryState::Committed { retries: 2, .. }));
    }

    #[test]
    fn test_backoff_sample_bounds() {
        let range = BackoffRange::default();
        let mut rng = ScriptedSource::new([50, 149]);
        assert_eq!(range.sample(&mut rng), Duration::from_millis(50));
        assert_eq!(range.sample(&mut rng), Duration::from_millis(149));

        let fixed = BackoffRange::new(Duration::from_millis(20), Duration::from_millis(5));
        assert_eq!(fixed.max(), Duration::from_millis(20));
        assert_eq!(fixed.sample(&mut ScriptedSource::default()), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_conflict_retries_exactly_budget() {
        let controller = RetryController::new(policy(3));
        let mut rng = ScriptedSource::new([60, 70, 80]);
        let mut calls = 0;

        let started = tokio::time::Instant::now();
        let outcome = controller
            .attempt(&mut rng, |_| {
                calls += 1;
                Err(conflict())
            })
            .await;
        let elapsed = started.elapsed();

        assert_eq!(calls, 4);
        assert_eq!(outcome.retries(), 3);
        assert!(matches!(outcome, Outcome::Exhausted { .. }));
        assert_eq!(outcome.error().map(Error::kind), Some(ErrorKind::Conflict));
        assert!(elapsed >= Duration::from_millis(210));
        assert!(elapsed < Duration::from_millis(220));
        assert_eq!(rng.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_fault_short_circuits() {
        let controller = RetryController::new(policy(5));
        let mut rng = ScriptedSource::default();
        let mut calls = 0;

        let started = tokio::time::Instant::now();
        let outcome = controller
            .attempt(&mut rng, |_| {
                calls += 1;
                Err(Error::Storage("no such table".into()))
            })
            .await;

        assert_eq!(calls, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        match outcome {
            Outcome::Faulted { retries, error } => {
                assert_eq!(retries, 0);
                assert_eq!(error.kind(), ErrorKind::StoreFault);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let controller = RetryController::new(policy(2));
        let mut rng = ScriptedSource::new([100, 100]);
        let mut results = vec![
            Ok(record()),
            Err(Error::InsufficientFunds {
                account: "A1".into(),
                balance: 0,
                requested: 1,
            }),
            Err(conflict()),
        ];

        let outcome = controller
            .attempt(&mut rng, |_| results.pop().unwrap())
            .await;

        assert!(outcome.is_committed());
        assert_eq!(outcome.retries(), 2);
        assert!(outcome.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_follow_attempts() {
        let metrics = Metrics::new().unwrap();
        let controller = RetryController::new(policy(1)).with_metrics(metrics.clone());
        let mut rng = ScriptedSource::new([50]);

        controller.attempt(&mut rng, |_| Err(conflict())).await;

        assert_eq!(metrics.conflicts.get(), 2);
        assert_eq!(metrics.retries.get(), 1);
        assert_eq!(metrics.exhausted.get(), 1);
        assert_eq!(metrics.committed.get(), 0);
    }
}
