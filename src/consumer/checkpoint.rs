//! Checkpoint sink interface and the checkpoint retry procedure
//!
//! The position token itself belongs to the [`Checkpointer`]; the processor
//! only decides when to ask for it to be persisted and how to react when that
//! fails. Failures come in three classes, each with its own policy:
//!
//! - [`CheckpointError::Shutdown`]: another worker owns the shard now. Stop at once.
//! - [`CheckpointError::Throttling`]: transient. Back off and retry up to the ceiling.
//! - [`CheckpointError::InvalidState`]: the checkpoint store is unusable. Stop at once.

use crate::consumer::retry::{Attempt, RetryExecutor, RetryPolicy, RetryResult};
use crate::consumer::shutdown::ShutdownSignal;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

/// Classified checkpoint failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// The processor no longer holds the shard lease
    #[error("processor no longer owns the shard: {0}")]
    Shutdown(String),

    /// The checkpoint store is throttling requests
    #[error("checkpoint throttled: {0}")]
    Throttling(String),

    /// The checkpoint store is missing or misconfigured
    #[error("checkpoint store unusable: {0}")]
    InvalidState(String),
}

impl CheckpointError {
    /// Only throttling is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckpointError::Throttling(_))
    }
}

/// Persists the current shard position
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Record that everything delivered so far has been processed
    async fn checkpoint(&self) -> Result<(), CheckpointError>;
}

/// How a checkpoint procedure ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The position was persisted
    Completed {
        /// Attempts made
        attempts: u32,
    },
    /// The lease is gone; nothing was persisted
    LeaseLost {
        /// Attempts made
        attempts: u32,
    },
    /// Throttled on every attempt
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// The checkpoint store rejected the write as unusable
    Unusable {
        /// Attempts made
        attempts: u32,
    },
    /// Shutdown interrupted a backoff
    Cancelled {
        /// Attempts made
        attempts: u32,
    },
}

impl CheckpointOutcome {
    /// Number of `checkpoint()` calls made
    pub fn attempts(&self) -> u32 {
        match *self {
            CheckpointOutcome::Completed { attempts }
            | CheckpointOutcome::LeaseLost { attempts }
            | CheckpointOutcome::Exhausted { attempts }
            | CheckpointOutcome::Unusable { attempts }
            | CheckpointOutcome::Cancelled { attempts } => attempts,
        }
    }

    /// Whether the position was persisted
    pub fn is_completed(&self) -> bool {
        matches!(self, CheckpointOutcome::Completed { .. })
    }
}

/// Persist the shard position, retrying throttled writes with a fixed backoff.
///
/// Never fails: every outcome is logged and returned so processing can go on.
pub async fn checkpoint_with_retries(
    shard_id: &str,
    checkpointer: &dyn Checkpointer,
    policy: &RetryPolicy,
    shutdown: &ShutdownSignal,
) -> CheckpointOutcome {
    info!(shard_id, "Checkpointing shard");

    let executor = RetryExecutor::new(policy, shutdown);
    let result = executor
        .execute(|_| async move {
            match checkpointer.checkpoint().await {
                Ok(()) => Attempt::Success(()),
                Err(e) if e.is_retryable() => Attempt::Retryable(e),
                Err(e) => Attempt::Permanent(e),
            }
        })
        .await;

    match result {
        RetryResult::Success { attempts, .. } => {
            info!(shard_id, attempts, "Checkpoint complete");
            CheckpointOutcome::Completed { attempts }
        }
        RetryResult::Rejected {
            error: CheckpointError::Shutdown(reason),
            attempts,
        } => {
            info!(shard_id, %reason, "Lease lost, skipping checkpoint");
            CheckpointOutcome::LeaseLost { attempts }
        }
        RetryResult::Rejected { error, attempts } => {
            error!(
                shard_id,
                %error,
                "Cannot save checkpoint, the checkpoint store is unusable"
            );
            CheckpointOutcome::Unusable { attempts }
        }
        RetryResult::Exhausted { error, attempts } => {
            error!(
                shard_id,
                %error,
                "Checkpoint failed after {} attempts", attempts
            );
            CheckpointOutcome::Exhausted { attempts }
        }
        RetryResult::Cancelled { error, attempts } => {
            warn!(
                shard_id,
                %error,
                attempts,
                "Checkpoint abandoned on shutdown"
            );
            CheckpointOutcome::Cancelled { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays scripted results, then succeeds
    struct ScriptedCheckpointer {
        script: Mutex<VecDeque<Result<(), CheckpointError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedCheckpointer {
        fn new(script: Vec<Result<(), CheckpointError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Checkpointer for ScriptedCheckpointer {
        async fn checkpoint(&self) -> Result<(), CheckpointError> {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn throttled() -> Result<(), CheckpointError> {
        Err(CheckpointError::Throttling("rate exceeded".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_lost_stops_without_sleeping() {
        let checkpointer =
            ScriptedCheckpointer::new(vec![Err(CheckpointError::Shutdown("lease".to_string()))]);
        let start = Instant::now();

        let outcome = checkpoint_with_retries(
            "shard-0",
            &checkpointer,
            &RetryPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await;

        assert_eq!(outcome, CheckpointOutcome::LeaseLost { attempts: 1 });
        assert_eq!(checkpointer.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_state_fails_fast() {
        let checkpointer = ScriptedCheckpointer::new(vec![Err(CheckpointError::InvalidState(
            "table missing".to_string(),
        ))]);

        let outcome = checkpoint_with_retries(
            "shard-0",
            &checkpointer,
            &RetryPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await;

        assert_eq!(outcome, CheckpointOutcome::Unusable { attempts: 1 });
        assert_eq!(checkpointer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_retries_then_succeeds() {
        let checkpointer = ScriptedCheckpointer::new(vec![throttled(), throttled()]);
        let start = Instant::now();

        let outcome = checkpoint_with_retries(
            "shard-0",
            &checkpointer,
            &RetryPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await;

        assert_eq!(outcome, CheckpointOutcome::Completed { attempts: 3 });
        assert!(start.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_gives_up_at_ceiling() {
        let checkpointer = ScriptedCheckpointer::new((0..20).map(|_| throttled()).collect());

        let outcome = checkpoint_with_retries(
            "shard-0",
            &checkpointer,
            &RetryPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await;

        assert_eq!(outcome, CheckpointOutcome::Exhausted { attempts: 10 });
        assert_eq!(checkpointer.calls(), 10);
        assert!(!outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_then_lease_lost() {
        let checkpointer = ScriptedCheckpointer::new(vec![
            throttled(),
            Err(CheckpointError::Shutdown("taken over".to_string())),
        ]);

        let outcome = checkpoint_with_retries(
            "shard-0",
            &checkpointer,
            &RetryPolicy::default(),
            &ShutdownSignal::new(),
        )
        .await;

        assert_eq!(outcome, CheckpointOutcome::LeaseLost { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_checkpoint_backoff() {
        let checkpointer = ScriptedCheckpointer::new((0..20).map(|_| throttled()).collect());
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let outcome =
            checkpoint_with_retries("shard-0", &checkpointer, &RetryPolicy::default(), &shutdown)
                .await;

        assert_eq!(outcome, CheckpointOutcome::Cancelled { attempts: 1 });
        assert_eq!(outcome.attempts(), 1);
    }
}
