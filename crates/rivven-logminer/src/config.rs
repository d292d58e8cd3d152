//! Configuration for LogMiner transaction buffering
//!
//! ```yaml
//! buffer_mode:
//!   mode: tiered
//!   spill_threshold: 10000
//! spill:
//!   path: /var/lib/rivven/logminer/spill.redb
//!   codec: postcard
//! retry:
//!   max_retries: -1
//!   base_delay: 1s
//!   max_delay: 1m
//! transaction_id_policy: process_unique
//! ```

use crate::buffer::BufferMode;
use crate::codec::CodecKind;
use crate::error::{LogMinerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// How transaction ids relate to the lifetime of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionIdPolicy {
    /// Ids are never reused while the process runs. Changes that arrive for
    /// a recently committed or rolled back id (replayed after a session
    /// restart) are dropped.
    #[default]
    ProcessUnique,
    /// A retired id may start a new transaction.
    AllowReuse,
}

/// Spill tier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SpillConfig {
    /// Database file for the redb spill store
    #[serde(default = "default_spill_path")]
    pub path: PathBuf,

    /// Codec for spilled events
    #[serde(default)]
    pub codec: CodecKind,

    /// Fsync every spill write
    #[serde(default)]
    pub durable_writes: bool,
}

fn default_spill_path() -> PathBuf {
    PathBuf::from("logminer-spill/spill.redb")
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            path: default_spill_path(),
            codec: CodecKind::default(),
            durable_writes: false,
        }
    }
}

/// Session reopen budget and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    /// Maximum consecutive reopen attempts.
    /// - `-1` = retry forever
    /// - `0` = never reopen
    /// - `n` = reopen up to n times in a row
    #[serde(default = "default_max_retries")]
    #[validate(range(min = -1))]
    pub max_retries: i32,

    /// Delay before the first reopen
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Backoff cap
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter factor (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

fn default_max_retries() -> i32 {
    -1
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Never reopen the session.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Reopen up to `max_retries` times without waiting; for tests.
    pub fn immediate(max_retries: i32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.max_retries == -1
    }

    /// Check if another attempt is allowed after `attempt` consecutive ones.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_retries {
            -1 => true,
            0 => false,
            max => attempt < max as u32,
        }
    }

    /// Delay for a given attempt (exponential backoff with jitter).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = base.min(self.max_delay);

        if self.jitter > 0.0 {
            let jitter_range = capped.as_secs_f64() * self.jitter;
            // Deterministic jitter from the attempt number (golden ratio)
            let jitter_offset = (attempt as f64 * 0.618033988749895) % 1.0;
            let jitter_amount = jitter_range * (jitter_offset * 2.0 - 1.0);
            // Near Duration::MAX the jittered value can overflow
            Duration::try_from_secs_f64((capped.as_secs_f64() + jitter_amount).max(0.0))
                .unwrap_or(capped)
        } else {
            capped
        }
    }
}

/// Extra entries for the retriable error classifier, added to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Error code prefixes (case-sensitive starts-with)
    #[serde(default)]
    pub error_codes: Vec<String>,

    /// Message fragments (case-insensitive contains)
    #[serde(default)]
    pub error_messages: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LogMinerConfig {
    /// Where transaction buffers keep their events
    #[serde(default)]
    pub buffer_mode: BufferMode,

    /// Spill tier settings (ignored in memory mode)
    #[serde(default)]
    #[validate(nested)]
    pub spill: SpillConfig,

    /// Session reopen policy
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Classifier extensions
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Transaction id reuse policy
    #[serde(default)]
    pub transaction_id_policy: TransactionIdPolicy,

    /// Number of retired transaction ids remembered for the reuse policy
    #[serde(default = "default_retired_cache_size")]
    #[validate(range(max = 10_000_000))]
    pub retired_cache_size: usize,
}

fn default_retired_cache_size() -> usize {
    10_000
}

impl Default for LogMinerConfig {
    fn default() -> Self {
        Self {
            buffer_mode: BufferMode::default(),
            spill: SpillConfig::default(),
            retry: RetryPolicy::default(),
            classifier: ClassifierConfig::default(),
            transaction_id_policy: TransactionIdPolicy::default(),
            retired_cache_size: default_retired_cache_size(),
        }
    }
}

impl LogMinerConfig {
    /// Create a new config builder.
    pub fn builder() -> LogMinerConfigBuilder {
        LogMinerConfigBuilder::default()
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| LogMinerError::config(format!("invalid YAML: {}", e)))?;
        config.validate_config()?;
        Ok(config)
    }

    /// Check field ranges and cross-field constraints.
    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| LogMinerError::config(e.to_string()))?;

        if self.retry.max_delay < self.retry.base_delay {
            return Err(LogMinerError::config(format!(
                "retry.max_delay ({:?}) is below retry.base_delay ({:?})",
                self.retry.max_delay, self.retry.base_delay
            )));
        }
        if self.buffer_mode.requires_spill() && self.spill.path.as_os_str().is_empty() {
            return Err(LogMinerError::config(
                "spill.path must be set when the buffer mode spills",
            ));
        }
        Ok(())
    }
}

/// Builder for LogMinerConfig.
#[derive(Default)]
pub struct LogMinerConfigBuilder {
    config: LogMinerConfig,
}

impl LogMinerConfigBuilder {
    /// Set the buffer mode.
    pub fn buffer_mode(mut self, mode: BufferMode) -> Self {
        self.config.buffer_mode = mode;
        self
    }

    /// Set the spill database path.
    pub fn spill_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.spill.path = path.into();
        self
    }

    /// Set the spill codec.
    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.config.spill.codec = codec;
        self
    }

    /// Enable fsync on spill writes.
    pub fn durable_writes(mut self, enabled: bool) -> Self {
        self.config.spill.durable_writes = enabled;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Add a retriable error code prefix.
    pub fn retriable_error_code(mut self, code: impl Into<String>) -> Self {
        self.config.classifier.error_codes.push(code.into());
        self
    }

    /// Add a retriable message fragment.
    pub fn retriable_error_message(mut self, message: impl Into<String>) -> Self {
        self.config.classifier.error_messages.push(message.into());
        self
    }

    /// Set the transaction id policy.
    pub fn transaction_id_policy(mut self, policy: TransactionIdPolicy) -> Self {
        self.config.transaction_id_policy = policy;
        self
    }

    /// Set the retired id cache size.
    pub fn retired_cache_size(mut self, size: usize) -> Self {
        self.config.retired_cache_size = size;
        self
    }

    /// Build and validate the config.
    pub fn build(self) -> Result<LogMinerConfig> {
        self.config.validate_config()?;
        Ok(self.config)
    }
}
