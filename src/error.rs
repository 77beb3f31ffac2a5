//! Error types

use crate::consumer::checkpoint::CheckpointError;
use crate::record::DecodeError;
use crate::store::StoreError;
use thiserror::Error;

/// Crate-level result alias
pub type Result<T> = std::result::Result<T, KsumError>;

/// Errors surfaced by the crate
#[derive(Debug, Error)]
pub enum KsumError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("invalid configuration file: {0}")]
    ConfigFormat(#[from] serde_yaml::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Aggregate store update failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Checkpoint write failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A panic caught while processing a record
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl KsumError {
    /// Whether retrying the operation that produced this error can help.
    ///
    /// Only a malformed payload is final; store faults and panics are not
    /// classified any further.
    pub fn is_retryable(&self) -> bool {
        match self {
            KsumError::Decode(e) => e.is_retryable(),
            KsumError::Store(_) | KsumError::Unexpected(_) => true,
            KsumError::Checkpoint(e) => e.is_retryable(),
            KsumError::Config(_) | KsumError::ConfigFormat(_) | KsumError::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode_payload;

    #[test]
    fn test_retryable_classification() {
        let malformed: KsumError = decode_payload(b"not json").unwrap_err().into();
        assert!(!malformed.is_retryable());

        let encoding: KsumError = decode_payload(&[0xc3, 0x28]).unwrap_err().into();
        assert!(encoding.is_retryable());

        let store: KsumError = StoreError::InvalidKey.into();
        assert!(store.is_retryable());

        let throttled: KsumError = CheckpointError::Throttling("slow down".to_string()).into();
        assert!(throttled.is_retryable());

        let lease: KsumError = CheckpointError::Shutdown("lease lost".to_string()).into();
        assert!(!lease.is_retryable());

        assert!(KsumError::Unexpected("index out of bounds".to_string()).is_retryable());
        assert!(!KsumError::Config("bad".to_string()).is_retryable());
    }
}
