//! In-process aggregate store

use super::{parse_increment, AggregateStore, StoreError, UpdateOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Stored aggregate for one customer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregateRecord {
    /// Sum of all applied values
    pub total_sum: i64,
    /// Number of applied updates
    #[serde(rename = "Updates")]
    pub update_count: i64,
}

/// Aggregate store backed by a concurrent map.
///
/// Each update holds the entry's shard lock, so updates to one key are atomic
/// across tasks the same way the table service guarantees it.
#[derive(Debug, Default)]
pub struct InMemoryAggregateStore {
    records: DashMap<String, AggregateRecord>,
}

impl InMemoryAggregateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate for a customer
    pub fn get(&self, customer_id: &str) -> Option<AggregateRecord> {
        self.records.get(customer_id).map(|entry| *entry)
    }

    /// Number of customers with at least one update
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no update has been applied yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ordered copy of every aggregate
    pub fn snapshot(&self) -> BTreeMap<String, AggregateRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn add(&self, customer_id: &str, value: &str) -> Result<UpdateOutcome, StoreError> {
        let increment = parse_increment(customer_id, value)?;

        let mut entry = self.records.entry(customer_id.to_string()).or_default();
        let total_sum = entry
            .total_sum
            .checked_add(increment)
            .ok_or_else(|| StoreError::Overflow(customer_id.to_string()))?;
        entry.total_sum = total_sum;
        entry.update_count += 1;

        debug!(
            customer_id,
            total_sum = entry.total_sum,
            updates = entry.update_count,
            "Aggregate updated"
        );

        Ok(UpdateOutcome {
            total_sum: Some(entry.total_sum),
            update_count: Some(entry.update_count),
        })
    }

    fn name(&self) -> &str {
        "InMemoryAggregateStore"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_accumulates() {
        let store = InMemoryAggregateStore::new();
        store.add("11", "33").await.unwrap();
        let outcome = store.add("11", "-3").await.unwrap();

        assert_eq!(outcome.total_sum, Some(30));
        assert_eq!(outcome.update_count, Some(2));
        assert_eq!(
            store.get("11"),
            Some(AggregateRecord {
                total_sum: 30,
                update_count: 2
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_value_leaves_store_untouched() {
        let store = InMemoryAggregateStore::new();
        assert!(store.add("11", "abc").await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_is_rejected() {
        let store = InMemoryAggregateStore::new();
        store.add("big", &i64::MAX.to_string()).await.unwrap();
        let err = store.add("big", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::Overflow(_)));
        assert_eq!(store.get("big").unwrap().update_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_increments() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.add("shared", "2").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            store.get("shared"),
            Some(AggregateRecord {
                total_sum: 1600,
                update_count: 800
            })
        );
    }
}
