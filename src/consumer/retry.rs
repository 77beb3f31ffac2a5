//! Retry logic and policies for record processing and checkpointing

use crate::consumer::shutdown::{Backoff, ShutdownSignal};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum allowed attempts per operation
const MAX_RETRY_ATTEMPTS: u32 = 1000;
/// Maximum backoff duration
const MAX_BACKOFF_SECONDS: u64 = 3600; // 1 hour

/// Validate attempt count within reasonable bounds
fn validate_max_attempts<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u32::deserialize(deserializer)?;
    if value == 0 || value > MAX_RETRY_ATTEMPTS {
        return Err(serde::de::Error::custom(format!(
            "max_attempts {} must be between 1 and {}",
            value, MAX_RETRY_ATTEMPTS
        )));
    }
    Ok(value)
}

/// Validate backoff duration within reasonable bounds
fn validate_backoff<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = crate::consumer::config::duration_ms::deserialize(deserializer)?;
    if duration.as_secs() > MAX_BACKOFF_SECONDS {
        return Err(serde::de::Error::custom(format!(
            "backoff {:?} exceeds maximum allowed {} seconds",
            duration, MAX_BACKOFF_SECONDS
        )));
    }
    Ok(duration)
}

/// Fixed-backoff retry policy.
///
/// The wait between attempts never grows and carries no jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(deserialize_with = "validate_max_attempts")]
    pub max_attempts: u32,
    /// Wait between two attempts
    #[serde(
        rename = "backoff_ms",
        serialize_with = "crate::consumer::config::duration_ms::serialize",
        deserialize_with = "validate_backoff"
    )]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_millis(3000))
    }
}

impl RetryPolicy {
    /// Create a policy with fixed backoff
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Create a policy that makes a single attempt
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Check if another attempt may follow attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Outcome of a single attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded
    Success(T),
    /// The operation failed and may succeed if tried again
    Retryable(E),
    /// The operation failed and retrying cannot help
    Permanent(E),
}

/// Retry result
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Success after `attempts` attempts
    Success { value: T, attempts: u32 },
    /// Retryable failures used up the whole policy
    Exhausted { error: E, attempts: u32 },
    /// A permanent failure stopped the retries
    Rejected { error: E, attempts: u32 },
    /// Shutdown interrupted the backoff after a retryable failure
    Cancelled { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. }
            | RetryResult::Exhausted { attempts, .. }
            | RetryResult::Rejected { attempts, .. }
            | RetryResult::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Whether the operation eventually succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }
}

/// Retry executor
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    shutdown: &'a ShutdownSignal,
}

impl<'a> RetryExecutor<'a> {
    /// Create a new retry executor
    pub fn new(policy: &'a RetryPolicy, shutdown: &'a ShutdownSignal) -> Self {
        Self { policy, shutdown }
    }

    /// Execute an operation until it succeeds, fails permanently, runs out of
    /// attempts, or shutdown interrupts a backoff.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation(attempt).await {
                Attempt::Success(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    return RetryResult::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Attempt::Permanent(error) => {
                    return RetryResult::Rejected {
                        error,
                        attempts: attempt,
                    };
                }
                Attempt::Retryable(error) => {
                    if !self.policy.should_retry(attempt) {
                        return RetryResult::Exhausted {
                            error,
                            attempts: attempt,
                        };
                    }

                    warn!(
                        "Attempt {} of {} failed, retrying in {:?}: {}",
                        attempt, self.policy.max_attempts, self.policy.backoff, error
                    );

                    if self.shutdown.backoff(self.policy.backoff).await == Backoff::Interrupted {
                        return RetryResult::Cancelled {
                            error,
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(9));
        assert!(!policy.should_retry(10)); // max_attempts is 10
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_executor_recovers() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(3000));
        let shutdown = ShutdownSignal::new();
        let executor = RetryExecutor::new(&policy, &shutdown);

        let count = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = executor
            .execute(|_| {
                let count = count.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) < 2 {
                        Attempt::Retryable("temporary error")
                    } else {
                        Attempt::Success("success")
                    }
                }
            })
            .await;

        match result {
            RetryResult::Success { value, attempts } => {
                assert_eq!(value, "success");
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected success, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_executor_exhausts_without_trailing_sleep() {
        let policy = RetryPolicy::fixed(10, Duration::from_millis(3000));
        let shutdown = ShutdownSignal::new();
        let executor = RetryExecutor::new(&policy, &shutdown);
        let start = Instant::now();

        let result: RetryResult<(), _> = executor
            .execute(|attempt| async move { Attempt::Retryable(format!("failure {}", attempt)) })
            .await;

        match result {
            RetryResult::Exhausted { error, attempts } => {
                assert_eq!(attempts, 10);
                assert_eq!(error, "failure 10");
            }
            other => panic!("Expected exhaustion, got {:?}", other),
        }
        // nine backoffs between ten attempts
        assert!(start.elapsed() >= Duration::from_millis(27_000));
        assert!(start.elapsed() < Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let shutdown = ShutdownSignal::new();
        let executor = RetryExecutor::new(&policy, &shutdown);
        let start = Instant::now();

        let result: RetryResult<(), _> = executor
            .execute(|_| async { Attempt::Permanent("bad input") })
            .await;

        assert!(matches!(result, RetryResult::Rejected { attempts: 1, .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_backoff() {
        let policy = RetryPolicy::default();
        let shutdown = ShutdownSignal::new();
        let executor = RetryExecutor::new(&policy, &shutdown);

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4000)).await;
            trigger.trigger();
        });

        let result: RetryResult<(), _> = executor
            .execute(|_| async { Attempt::Retryable("unavailable") })
            .await;

        assert!(matches!(result, RetryResult::Cancelled { attempts: 2, .. }));
        assert!(!result.is_success());
        assert_eq!(result.attempts(), 2);
    }

    #[test]
    fn test_retry_policy_validation() {
        let valid: Result<RetryPolicy, _> =
            serde_json::from_str(r#"{"max_attempts": 5, "backoff_ms": 1000}"#);
        assert_eq!(
            valid.unwrap(),
            RetryPolicy::fixed(5, Duration::from_millis(1000))
        );

        // Too many attempts
        let policy: Result<RetryPolicy, _> =
            serde_json::from_str(r#"{"max_attempts": 10000, "backoff_ms": 1000}"#);
        assert!(policy.is_err());

        // Zero attempts
        let policy: Result<RetryPolicy, _> =
            serde_json::from_str(r#"{"max_attempts": 0, "backoff_ms": 1000}"#);
        assert!(policy.is_err());

        // Backoff too long
        let policy: Result<RetryPolicy, _> =
            serde_json::from_str(r#"{"max_attempts": 5, "backoff_ms": 7200000}"#);
        assert!(policy.is_err());
    }
}
