//! # Node Configuration
//!
//! Unified configuration for the node identity and all replication
//! tunables.
//!
//! ## Security Requirements
//!
//! - `node.node_id` MUST be a registered, non-zero originator ID.
//! - `node.signing_key_hex`, when set, MUST be the node's registered
//!   32-byte Ed25519 seed; when unset, an ephemeral key is generated,
//!   which is only acceptable for tests and local runs.

use relay_replication::{
    PublishRetryPolicy, PublishWorkerConfig, ResolveStrategy, SubscribeWorkerConfig,
    VectorClockConfig, DEFAULT_SUBSCRIPTION_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Originator ID 0 is reserved.
    #[error("node.node_id must be a non-zero originator ID")]
    InvalidNodeId,

    /// The signing key is not a 64-character hex string.
    #[error("node.signing_key_hex must be 32 bytes of hex: {0}")]
    InvalidSigningKey(String),

    /// A page size or buffer size is not positive.
    #[error("replication.{0} must be positive")]
    InvalidLimit(&'static str),

    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity configuration.
    pub node: NodeIdentityConfig,
    /// Replication core configuration.
    pub replication: ReplicationSettings,
    /// Telemetry configuration.
    pub telemetry: TelemetrySettings,
}

impl NodeConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id == 0 {
            return Err(ConfigError::InvalidNodeId);
        }
        if let Some(key) = &self.node.signing_key_hex {
            let bytes = hex::decode(key)
                .map_err(|err| ConfigError::InvalidSigningKey(err.to_string()))?;
            if bytes.len() != 32 {
                return Err(ConfigError::InvalidSigningKey(format!(
                    "got {} bytes, want 32",
                    bytes.len()
                )));
            }
        }
        if self.replication.publish_page_size <= 0 {
            return Err(ConfigError::InvalidLimit("publish_page_size"));
        }
        if self.replication.subscribe_page_size <= 0 {
            return Err(ConfigError::InvalidLimit("subscribe_page_size"));
        }
        if self.replication.subscription_buffer_size == 0 {
            return Err(ConfigError::InvalidLimit("subscription_buffer_size"));
        }
        Ok(())
    }

    /// Returns the decoded signing seed, if one is configured.
    pub fn signing_seed(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(key) = &self.node.signing_key_hex else {
            return Ok(None);
        };
        let bytes =
            hex::decode(key).map_err(|err| ConfigError::InvalidSigningKey(err.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidSigningKey("wrong length".into()))?;
        Ok(Some(seed))
    }
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeIdentityConfig {
    /// This node's originator ID. Must be non-zero.
    pub node_id: u32,
    /// Hex-encoded 32-byte Ed25519 seed. Generated if absent.
    pub signing_key_hex: Option<String>,
    /// Retention period stamped into published envelopes.
    pub retention_days: u32,
}

impl Default for NodeIdentityConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            signing_key_hex: None,
            retention_days: relay_registrant::DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Replication core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    /// Fallback poll interval over the staged table (ms).
    pub publish_poll_interval_ms: u64,
    /// Staged rows per poll page.
    pub publish_page_size: i32,
    /// Delay between publish attempts for one envelope (ms).
    pub publish_retry_backoff_ms: u64,
    /// Publish attempts before dead-lettering; absent means retry forever.
    pub publish_max_attempts: Option<u32>,
    /// Fallback poll interval over the gateway table (ms).
    pub subscribe_poll_interval_ms: u64,
    /// Gateway rows per poll page.
    pub subscribe_page_size: i32,
    /// Per-listener channel capacity.
    pub subscription_buffer_size: usize,
    /// Interval between vector clock reconciliation passes (ms).
    pub vector_clock_sync_interval_ms: u64,
    /// What to do when the in-memory vector clock diverges from the store.
    pub resolve_strategy: ResolveStrategy,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            publish_poll_interval_ms: 1_000,
            publish_page_size: 100,
            publish_retry_backoff_ms: 1_000,
            publish_max_attempts: None,
            subscribe_poll_interval_ms: 100,
            subscribe_page_size: 1_000,
            subscription_buffer_size: DEFAULT_SUBSCRIPTION_BUFFER_SIZE,
            vector_clock_sync_interval_ms: 30_000,
            resolve_strategy: ResolveStrategy::Reconcile,
        }
    }
}

impl ReplicationSettings {
    /// Publish worker configuration.
    #[must_use]
    pub fn publish_config(&self) -> PublishWorkerConfig {
        PublishWorkerConfig {
            poll_interval: Duration::from_millis(self.publish_poll_interval_ms),
            page_size: self.publish_page_size,
            retry: PublishRetryPolicy {
                backoff: Duration::from_millis(self.publish_retry_backoff_ms),
                max_attempts: self.publish_max_attempts,
            },
        }
    }

    /// Subscribe worker configuration.
    #[must_use]
    pub fn subscribe_config(&self) -> SubscribeWorkerConfig {
        SubscribeWorkerConfig {
            poll_interval: Duration::from_millis(self.subscribe_poll_interval_ms),
            page_size: self.subscribe_page_size,
            buffer_size: self.subscription_buffer_size,
        }
    }

    /// Vector clock configuration.
    #[must_use]
    pub fn vector_clock_config(&self) -> VectorClockConfig {
        VectorClockConfig {
            sync_interval: Duration::from_millis(self.vector_clock_sync_interval_ms),
            resolve_strategy: self.resolve_strategy,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log level filter, overridable via `RUST_LOG`.
    pub log_level: String,
    /// Emit JSON logs for containers/production.
    pub json_logs: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
