//! Stream records and the payload decoder
//!
//! A [`RawRecord`] is what the delivery mechanism hands to a shard processor.
//! Its payload is UTF-8 JSON of the form:
//!
//! ```json
//! {"custId": "11", "value": "33"}
//! ```
//!
//! Decoding is a pure function; retry policy belongs to the caller.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A record as delivered from one shard of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Opaque payload bytes
    pub data: Bytes,
    /// Stream-assigned sequence number, unique within the shard
    pub sequence_number: String,
    /// Partition key the producer used
    pub partition_key: String,
    /// Approximate time the stream accepted the record
    pub approximate_arrival: Option<DateTime<Utc>>,
}

impl RawRecord {
    /// Create a record with no arrival timestamp
    pub fn new(
        data: impl Into<Bytes>,
        sequence_number: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            approximate_arrival: None,
        }
    }

    /// Attach the stream arrival timestamp
    pub fn with_arrival(mut self, arrival: DateTime<Utc>) -> Self {
        self.approximate_arrival = Some(arrival);
        self
    }
}

impl fmt::Display for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{sequence: {}, partition key: {}, {} bytes}}",
            self.sequence_number,
            self.partition_key,
            self.data.len()
        )
    }
}

/// Errors produced while decoding a payload
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload bytes are not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Payload text is not a JSON object carrying both required fields
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl DecodeError {
    /// Whether the processing loop should spend retry attempts on this error.
    ///
    /// Encoding faults count against the per-record retry budget even though a
    /// byte sequence never changes between attempts. Parse faults do not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DecodeError::Encoding(_))
    }
}

/// Typed payload of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRecord {
    /// Customer the value is credited to
    #[serde(rename = "custId")]
    pub customer_id: String,
    /// Integer amount, still in its wire string form
    pub value: String,
}

impl DecodedRecord {
    /// Parse a record from JSON text. Unknown fields are ignored; an empty
    /// customer id is malformed.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        // serde would also accept a positional array for a struct
        if !value.is_object() {
            return Err(DecodeError::Malformed(serde::de::Error::custom(
                "payload is not a JSON object",
            )));
        }
        let record: DecodedRecord = serde_json::from_value(value)?;
        if record.customer_id.is_empty() {
            return Err(DecodeError::Malformed(serde::de::Error::custom(
                "custId must not be empty",
            )));
        }
        Ok(record)
    }
}

/// Decode raw payload bytes into a [`DecodedRecord`]
pub fn decode_payload(data: &[u8]) -> Result<DecodedRecord, DecodeError> {
    let text = std::str::from_utf8(data)?;
    DecodedRecord::from_json(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_happy_json_decode() {
        let record = DecodedRecord::from_json(r#"{"custId": "11", "value": "33"}"#).unwrap();
        assert_eq!(record.customer_id, "11");
        assert_eq!(record.value, "33");
    }

    #[test]
    fn test_extra_fields_ignored() {
        let record =
            DecodedRecord::from_json(r#"{"custId": "7", "value": "-2", "region": "eu"}"#).unwrap();
        assert_eq!(
            record,
            DecodedRecord {
                customer_id: "7".to_string(),
                value: "-2".to_string(),
            }
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::not_json("custId=11,value=33")]
    #[case::missing_value(r#"{"custId": "11"}"#)]
    #[case::missing_customer(r#"{"value": "33"}"#)]
    #[case::array(r#"["11", "33"]"#)]
    #[case::numeric_fields(r#"{"custId": 11, "value": 33}"#)]
    #[case::empty_customer(r#"{"custId":"","value":"1"}"#)]
    fn test_bad_decode(#[case] input: &str) {
        let err = DecodedRecord::from_json(input).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_utf8_is_retryable() {
        let err = decode_payload(&[0x7b, 0xff, 0xfe, 0x7d]).unwrap_err();
        assert!(matches!(err, DecodeError::Encoding(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_raw_record_display() {
        let record = RawRecord::new(Bytes::from_static(b"{}"), "4959033827149025660", "pk-1");
        let shown = record.to_string();
        assert!(shown.contains("pk-1"));
        assert!(shown.contains("2 bytes"));
    }

    proptest! {
        #[test]
        fn prop_well_formed_payload_decodes(customer in "[a-zA-Z0-9_-]{1,24}", value in any::<i64>()) {
            let payload = serde_json::json!({"custId": customer, "value": value.to_string()});
            let bytes = serde_json::to_vec(&payload).unwrap();
            let record = decode_payload(&bytes).unwrap();
            prop_assert_eq!(record.customer_id, customer);
            prop_assert_eq!(record.value, value.to_string());
        }

        #[test]
        fn prop_non_object_text_never_decodes(text in "[^{\\[]*") {
            prop_assert!(DecodedRecord::from_json(&text).is_err());
        }
    }
}
