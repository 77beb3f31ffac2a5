//! Per-shard stream consumer that folds customer values into an aggregate table
//!
//! Each record carries a JSON payload `{"custId": "...", "value": "..."}`. The
//! value is added to the customer's running total and the customer's update
//! count is incremented, with one atomic store update per record. Progress is
//! checkpointed on a fixed interval at batch boundaries.
//!
//! # Example
//!
//! ```no_run
//! use ksum::consumer::{Checkpointer, ProcessorConfig, RecordProcessor, ShardProcessor, ShutdownSignal};
//! use ksum::store::InMemoryAggregateStore;
//! use ksum::RawRecord;
//! use std::sync::Arc;
//!
//! # async fn example(checkpointer: &dyn Checkpointer) -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryAggregateStore::new());
//! let mut processor = ShardProcessor::new(
//!     ProcessorConfig::default(),
//!     store.clone(),
//!     ShutdownSignal::new(),
//! );
//!
//! processor.initialize("shardId-000000000000").await;
//! let record = RawRecord::new(r#"{"custId":"c-1","value":"11"}"#, "1", "c-1");
//! processor.process_records(&[record], checkpointer).await;
//!
//! assert_eq!(store.get("c-1").map(|r| r.total_sum), Some(11));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

// Re-export commonly used items
pub use consumer::{
    ProcessorConfig, RecordProcessor, RecordProcessorFactory, ShardProcessor,
    ShardProcessorFactory, ShutdownReason, ShutdownSignal,
};
pub use error::{KsumError, Result};
pub use record::{DecodedRecord, RawRecord};
pub use store::{AggregateStore, StoreConfig};

/// Shard processing, checkpointing and retries
pub mod consumer;

/// Error types
pub mod error;

/// Stream records and payload decoding
pub mod record;

/// Aggregate table clients
pub mod store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber with default settings
pub fn init_tracing() {
    init_tracing_with("info", true);
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level` when set. `json` selects
/// one JSON object per event instead of human-readable lines.
pub fn init_tracing_with(default_level: &str, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
