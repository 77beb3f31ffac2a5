//! DynamoDB-backed aggregate store

use super::{
    parse_increment, AggregateStore, StoreConfig, StoreError, UpdateOutcome,
    CUSTOMER_ID_ATTRIBUTE, TOTAL_SUM_ATTRIBUTE, UPDATE_COUNT_ATTRIBUTE,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;
use tracing::{debug, info};

/// `ADD` creates missing attributes at zero, so the first update for a
/// customer needs no separate put.
const UPDATE_EXPRESSION: &str = "ADD #sum :val, #count :inc";

/// Aggregate store issuing one `UpdateItem` per applied record
#[derive(Debug, Clone)]
pub struct DynamoDbAggregateStore {
    client: Client,
    table_name: String,
}

impl DynamoDbAggregateStore {
    /// Wrap an existing client
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Build a client from the ambient AWS credentials and the store settings
    pub async fn from_config(config: &StoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        info!(
            region = %config.region,
            endpoint = ?config.endpoint,
            table = %config.table_name,
            "Configured aggregate store"
        );

        Self::new(Client::new(&sdk_config), config.table_name.clone())
    }

    /// Table the updates are written to
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn number_attribute(attributes: &HashMap<String, AttributeValue>, name: &str) -> Option<i64> {
    attributes
        .get(name)
        .and_then(|value| value.as_n().ok())
        .and_then(|n| n.parse().ok())
}

#[async_trait]
impl AggregateStore for DynamoDbAggregateStore {
    async fn add(&self, customer_id: &str, value: &str) -> Result<UpdateOutcome, StoreError> {
        let increment = parse_increment(customer_id, value)?;

        let output = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(
                CUSTOMER_ID_ATTRIBUTE,
                AttributeValue::S(customer_id.to_string()),
            )
            .update_expression(UPDATE_EXPRESSION)
            .expression_attribute_names("#sum", TOTAL_SUM_ATTRIBUTE)
            .expression_attribute_names("#count", UPDATE_COUNT_ATTRIBUTE)
            .expression_attribute_values(":val", AttributeValue::N(increment.to_string()))
            .expression_attribute_values(":inc", AttributeValue::N("1".to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(&e).to_string()))?;

        let outcome = output
            .attributes()
            .map(|attributes| UpdateOutcome {
                total_sum: number_attribute(attributes, TOTAL_SUM_ATTRIBUTE),
                update_count: number_attribute(attributes, UPDATE_COUNT_ATTRIBUTE),
            })
            .unwrap_or_default();

        debug!(
            customer_id,
            total_sum = ?outcome.total_sum,
            updates = ?outcome.update_count,
            "UpdateItem succeeded"
        );

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "DynamoDbAggregateStore"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_attribute() {
        let mut attributes = HashMap::new();
        attributes.insert(
            TOTAL_SUM_ATTRIBUTE.to_string(),
            AttributeValue::N("42".to_string()),
        );
        attributes.insert(
            UPDATE_COUNT_ATTRIBUTE.to_string(),
            AttributeValue::S("not a number".to_string()),
        );

        assert_eq!(number_attribute(&attributes, TOTAL_SUM_ATTRIBUTE), Some(42));
        assert_eq!(number_attribute(&attributes, UPDATE_COUNT_ATTRIBUTE), None);
        assert_eq!(number_attribute(&attributes, "Missing"), None);
    }
}
