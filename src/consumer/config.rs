//! Shard processor configuration structures

use crate::consumer::retry::RetryPolicy;
use crate::error::{KsumError, Result};
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default interval between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(60_000);
/// Default number of records handed to the processor at once by the replay driver
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Durations on the configuration surface are integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Shard processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Aggregate table settings
    pub store: StoreConfig,

    /// Retry policy for applying a single record
    pub record_retry: RetryPolicy,

    /// Retry policy for a checkpoint write
    pub checkpoint_retry: RetryPolicy,

    /// Minimum time between interval checkpoints
    #[serde(rename = "checkpoint_interval_ms", with = "duration_ms")]
    pub checkpoint_interval: Duration,

    /// Records per batch when replaying a local input
    pub batch_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            record_retry: RetryPolicy::default(),
            checkpoint_retry: RetryPolicy::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Builder for ProcessorConfig
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    /// Create a builder starting from the defaults
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
        }
    }

    /// Set the aggregate table settings
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Set the aggregate table name
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.config.store.table_name = table_name.into();
        self
    }

    /// Set the store region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.store.region = region.into();
        self
    }

    /// Set or clear the store endpoint override
    pub fn endpoint(mut self, endpoint: Option<String>) -> Self {
        self.config.store.endpoint = endpoint;
        self
    }

    /// Set the per-record retry policy
    pub fn record_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.record_retry = policy;
        self
    }

    /// Set the checkpoint retry policy
    pub fn checkpoint_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.checkpoint_retry = policy;
        self
    }

    /// Set the checkpoint interval
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    /// Set the replay batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Build the processor configuration
    pub fn build(self) -> ProcessorConfig {
        self.config
    }
}

impl Default for ProcessorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorConfig {
    /// Create a new processor config builder
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ProcessorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.table_name.is_empty() {
            return Err(KsumError::Config("Table name cannot be empty".to_string()));
        }

        if self.store.region.is_empty() {
            return Err(KsumError::Config("Region cannot be empty".to_string()));
        }

        if self.record_retry.max_attempts == 0 {
            return Err(KsumError::Config(
                "Record retry attempts must be greater than 0".to_string(),
            ));
        }

        if self.checkpoint_retry.max_attempts == 0 {
            return Err(KsumError::Config(
                "Checkpoint retry attempts must be greater than 0".to_string(),
            ));
        }

        if self.checkpoint_interval.is_zero() {
            return Err(KsumError::Config(
                "Checkpoint interval must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(KsumError::Config(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
