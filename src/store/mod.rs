//! Aggregate store clients
//!
//! Every applied record becomes one atomic "add value to `TotalSum`, add one to
//! `Updates`" mutation keyed by customer. The arithmetic happens inside the
//! store so concurrent shard processors never lose an increment; clients never
//! read-modify-write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbAggregateStore;
pub use memory::InMemoryAggregateStore;

/// Attribute holding the customer key
pub const CUSTOMER_ID_ATTRIBUTE: &str = "CustomerId";
/// Attribute holding the running sum
pub const TOTAL_SUM_ATTRIBUTE: &str = "TotalSum";
/// Attribute holding the number of applied updates
pub const UPDATE_COUNT_ATTRIBUTE: &str = "Updates";

/// Errors surfaced by an aggregate store client.
///
/// Callers get no transient/permanent distinction from the client; the
/// processing loop retries all of them the same way.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The value is not an integer
    #[error("value '{value}' is not an integer: {source}")]
    InvalidValue {
        /// Offending wire value
        value: String,
        /// Parse failure
        #[source]
        source: std::num::ParseIntError,
    },

    /// The customer key is empty
    #[error("customer id must not be empty")]
    InvalidKey,

    /// Adding the value would overflow the running sum
    #[error("running sum for customer '{0}' would overflow")]
    Overflow(String),

    /// The request to the store failed
    #[error("store request failed: {0}")]
    Request(String),
}

/// Connection settings for the aggregate table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Region the table lives in
    pub region: String,
    /// Endpoint override; the SDK resolves one from the region when unset
    pub endpoint: Option<String>,
    /// Aggregate table name
    pub table_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1".to_string(),
            endpoint: Some("https://dynamodb.eu-west-1.amazonaws.com".to_string()),
            table_name: "CustomerSum".to_string(),
        }
    }
}

/// Attribute values the store reported after an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Running sum after the update, if the store returned it
    pub total_sum: Option<i64>,
    /// Update count after the update, if the store returned it
    pub update_count: Option<i64>,
}

/// Client for the durable aggregate table
#[async_trait]
pub trait AggregateStore: Send + Sync + 'static {
    /// Atomically add `value` to the customer's sum and increment its count
    async fn add(&self, customer_id: &str, value: &str) -> Result<UpdateOutcome, StoreError>;

    /// Store name for logs
    fn name(&self) -> &str {
        "AggregateStore"
    }
}

/// Validate an update request before it reaches the store
pub fn parse_increment(customer_id: &str, value: &str) -> Result<i64, StoreError> {
    if customer_id.is_empty() {
        return Err(StoreError::InvalidKey);
    }
    value.parse::<i64>().map_err(|source| StoreError::InvalidValue {
        value: value.to_string(),
        source,
    })
}
