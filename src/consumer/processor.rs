//! Record processor trait and the per-shard processing loop

use crate::consumer::checkpoint::{checkpoint_with_retries, CheckpointOutcome, Checkpointer};
use crate::consumer::config::ProcessorConfig;
use crate::consumer::metrics::ProcessorMetrics;
use crate::consumer::retry::{Attempt, RetryExecutor, RetryResult};
use crate::consumer::shutdown::ShutdownSignal;
use crate::error::KsumError;
use crate::record::{decode_payload, RawRecord};
use crate::store::{AggregateStore, UpdateOutcome};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a processor is being shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shard has no more data (split or merged); checkpoint so a child
    /// shard's processor starts from the right place
    Terminate,
    /// The lease was lost to another worker; the new owner tracks progress
    Zombie,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Terminate => write!(f, "TERMINATE"),
            ShutdownReason::Zombie => write!(f, "ZOMBIE"),
        }
    }
}

/// Callbacks the delivery mechanism drives for one shard.
///
/// Each processor is owned by a single task for the lifetime of its shard
/// assignment, so the methods take `&mut self`.
#[async_trait]
pub trait RecordProcessor: Send + 'static {
    /// Called once before any records are delivered
    async fn initialize(&mut self, shard_id: &str);

    /// Process one ordered batch of records
    async fn process_records(&mut self, records: &[RawRecord], checkpointer: &dyn Checkpointer);

    /// Called once when the processor gives up the shard
    async fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason);
}

/// Creates one processor per assigned shard
pub trait RecordProcessorFactory: Send + Sync {
    /// Processor type handed to shard workers
    type Processor: RecordProcessor;

    /// Build a fresh processor
    fn create_processor(&self) -> Self::Processor;
}

/// Per-shard loop: applies each record to the aggregate store with bounded
/// retries and checkpoints on a fixed interval.
pub struct ShardProcessor {
    config: ProcessorConfig,
    store: Arc<dyn AggregateStore>,
    shutdown: ShutdownSignal,
    metrics: Arc<ProcessorMetrics>,
    shard_id: String,
    next_checkpoint: Option<Instant>,
}

impl ShardProcessor {
    /// Create a processor; the shard id arrives with [`RecordProcessor::initialize`]
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn AggregateStore>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            store,
            shutdown,
            metrics: Arc::new(ProcessorMetrics::new()),
            shard_id: String::new(),
            next_checkpoint: None,
        }
    }

    /// Shard this processor was initialised for
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Counters for this processor
    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        self.metrics.clone()
    }

    /// When the next interval checkpoint becomes due; `None` until the first one
    pub fn next_checkpoint_deadline(&self) -> Option<Instant> {
        self.next_checkpoint
    }

    fn checkpoint_due(&self) -> bool {
        match self.next_checkpoint {
            None => true,
            Some(deadline) => Instant::now() > deadline,
        }
    }

    /// Decode one record and apply it to the store
    async fn process_one(&self, record: &RawRecord) -> Attempt<UpdateOutcome, KsumError> {
        let decoded = match decode_payload(&record.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                let e = KsumError::from(e);
                if !e.is_retryable() {
                    return Attempt::Permanent(e);
                }
                error!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    error = %e,
                    "Malformed data"
                );
                return Attempt::Retryable(e);
            }
        };

        debug!(
            sequence = %record.sequence_number,
            partition_key = %record.partition_key,
            customer_id = %decoded.customer_id,
            value = %decoded.value,
            "Decoded record"
        );

        match self.store.add(&decoded.customer_id, &decoded.value).await {
            Ok(outcome) => Attempt::Success(outcome),
            Err(e) => classify(e.into()),
        }
    }

    /// Run one attempt, turning a panic inside the store client into a
    /// retryable failure so it cannot take down the shard task
    async fn attempt_one(&self, record: &RawRecord) -> Attempt<UpdateOutcome, KsumError> {
        match AssertUnwindSafe(self.process_one(record)).catch_unwind().await {
            Ok(attempt) => attempt,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    panic = %message,
                    "Unexpected failure while processing record"
                );
                Attempt::Retryable(KsumError::Unexpected(message))
            }
        }
    }

    /// Process a record with retries. Returns `false` if shutdown cut the
    /// retries short.
    async fn process_with_retries(&self, record: &RawRecord) -> bool {
        let executor = RetryExecutor::new(&self.config.record_retry, &self.shutdown);
        let result = executor.execute(|_| self.attempt_one(record)).await;

        let attempts = result.attempts();
        self.metrics
            .add_failed_attempts(if result.is_success() { attempts - 1 } else { attempts });

        match result {
            RetryResult::Success { value, attempts } => {
                self.metrics.increment_applied();
                info!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    total_sum = ?value.total_sum,
                    updates = ?value.update_count,
                    attempts,
                    "Record applied"
                );
                true
            }
            RetryResult::Rejected { error, .. } => {
                self.metrics.increment_skipped();
                info!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    %error,
                    "Can't decode record, ignoring"
                );
                true
            }
            RetryResult::Exhausted { error, attempts } => {
                self.metrics.increment_dropped();
                error!(
                    shard_id = %self.shard_id,
                    %error,
                    attempts,
                    "Couldn't process record {}. Skipping the record.", record
                );
                true
            }
            RetryResult::Cancelled { error, attempts } => {
                self.metrics.increment_deferred();
                warn!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    %error,
                    attempts,
                    "Shutdown interrupted retries, leaving record for redelivery"
                );
                false
            }
        }
    }

    async fn checkpoint(&self, checkpointer: &dyn Checkpointer) -> CheckpointOutcome {
        let outcome = checkpoint_with_retries(
            &self.shard_id,
            checkpointer,
            &self.config.checkpoint_retry,
            &self.shutdown,
        )
        .await;
        self.metrics.record_checkpoint(outcome.is_completed());
        debug!(
            shard_id = %self.shard_id,
            attempts = outcome.attempts(),
            completed = outcome.is_completed(),
            "Checkpoint procedure finished"
        );
        outcome
    }
}

fn classify(error: KsumError) -> Attempt<UpdateOutcome, KsumError> {
    if error.is_retryable() {
        Attempt::Retryable(error)
    } else {
        Attempt::Permanent(error)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[async_trait]
impl RecordProcessor for ShardProcessor {
    async fn initialize(&mut self, shard_id: &str) {
        info!(shard_id, store = self.store.name(), "Initializing record processor");
        self.shard_id = shard_id.to_string();
    }

    async fn process_records(&mut self, records: &[RawRecord], checkpointer: &dyn Checkpointer) {
        info!(
            shard_id = %self.shard_id,
            count = records.len(),
            "Processing records"
        );
        self.metrics.add_received(records.len());

        for (index, record) in records.iter().enumerate() {
            let interrupted = self.shutdown.is_triggered() || !self.process_with_retries(record).await;
            if interrupted {
                warn!(
                    shard_id = %self.shard_id,
                    remaining = records.len() - index,
                    "Batch interrupted by shutdown, skipping checkpoint"
                );
                return;
            }
        }

        // Whole-batch aligned: never checkpoint between records
        if self.checkpoint_due() {
            self.checkpoint(checkpointer).await;
            self.next_checkpoint = Some(Instant::now() + self.config.checkpoint_interval);
        }
    }

    async fn shutdown(&mut self, checkpointer: &dyn Checkpointer, reason: ShutdownReason) {
        info!(shard_id = %self.shard_id, %reason, "Shutting down record processor");

        // After the end of a shard, child shards start from this checkpoint
        if reason == ShutdownReason::Terminate {
            self.checkpoint(checkpointer).await;
        }

        let stats = self.metrics.snapshot();
        info!(
            shard_id = %self.shard_id,
            received = stats.records_received,
            applied = stats.records_applied,
            skipped = stats.records_skipped,
            dropped = stats.records_dropped,
            deferred = stats.records_deferred,
            failed_attempts = stats.attempts_failed,
            checkpoints = stats.checkpoints_completed,
            failed_checkpoints = stats.checkpoints_failed,
            "Record processor stopped"
        );
    }
}

/// Builds [`ShardProcessor`]s that share one store and one parent shutdown signal
#[derive(Clone)]
pub struct ShardProcessorFactory {
    config: ProcessorConfig,
    store: Arc<dyn AggregateStore>,
    shutdown: ShutdownSignal,
}

impl ShardProcessorFactory {
    /// Create a factory
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn AggregateStore>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            store,
            shutdown,
        }
    }
}

impl RecordProcessorFactory for ShardProcessorFactory {
    type Processor = ShardProcessor;

    fn create_processor(&self) -> ShardProcessor {
        ShardProcessor::new(
            self.config.clone(),
            self.store.clone(),
            self.shutdown.child(),
        )
    }
}
