//! Shard consumer for the customer aggregate table
//!
//! This module provides the per-shard processing pipeline:
//! - Record decoding with malformed-record skipping
//! - Bounded fixed-backoff retries per record
//! - Interval checkpointing aligned to batch boundaries
//! - Classified checkpoint failure handling
//! - Cooperative shutdown of in-flight retries
//!
//! # Example
//!
//! ```no_run
//! use ksum::consumer::{
//!     run_replay, FileCheckpointer, ProcessorConfig, RecordProcessorFactory, ReplaySource,
//!     ShardProcessorFactory, ShutdownSignal,
//! };
//! use ksum::store::InMemoryAggregateStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ProcessorConfig::builder()
//!     .table_name("CustomerSum")
//!     .batch_size(100)
//!     .build();
//!
//! let shutdown = ShutdownSignal::new();
//! let factory = ShardProcessorFactory::new(
//!     config.clone(),
//!     Arc::new(InMemoryAggregateStore::new()),
//!     shutdown.clone(),
//! );
//!
//! let checkpointer = FileCheckpointer::new("shard-0.checkpoint");
//! let input = tokio::fs::File::open("records.jsonl").await?;
//! let mut source = ReplaySource::new(input, "shardId-000000000000", config.batch_size)
//!     .resume_after(checkpointer.load().await?);
//!
//! let mut processor = factory.create_processor();
//! run_replay(&mut processor, &mut source, &checkpointer, &shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod processor;
pub mod replay;
pub mod retry;
pub mod shutdown;

pub use checkpoint::{checkpoint_with_retries, CheckpointError, CheckpointOutcome, Checkpointer};
pub use config::{ProcessorConfig, ProcessorConfigBuilder};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use processor::{
    RecordProcessor, RecordProcessorFactory, ShardProcessor, ShardProcessorFactory,
    ShutdownReason,
};
pub use replay::{run_replay, FileCheckpointer, ReplaySource, ReplaySummary};
pub use retry::{Attempt, RetryExecutor, RetryPolicy, RetryResult};
pub use shutdown::{Backoff, ShutdownSignal};
