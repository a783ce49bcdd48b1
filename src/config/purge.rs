//! Purge and retention configuration.
//!
//! Controls how long recorder history is kept, how the nightly auto purge is
//! scheduled, and how much work a single purge pass may do before yielding
//! back to the recorder queue.
//!
//! # Example
//!
//! ```toml
//! [purge]
//! keep_days = 10
//! auto_purge = true
//! interval_hours = 24
//! auto_repack = true
//!
//! max_rows_per_batch = 998
//! max_batches_per_run = 1
//! retry_wait_secs = 3
//! max_retries = 10
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest number of rows deleted from one table in one transaction.
///
/// SQLite limits a statement to 999 host parameters; one slot is left for the
/// cutoff or run id bound next to the id list.
pub const MAX_ROWS_TO_PURGE: u32 = 998;

/// Longest auto purge interval accepted, ten years.
pub const MAX_INTERVAL_HOURS: u64 = 10 * 365 * 24;

/// Purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// Days of history to keep. Rows strictly older than `now - keep_days`
    /// are purged.
    /// Default: 10
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,

    /// Enqueue a purge automatically every `interval_hours`.
    /// Default: true
    #[serde(default = "default_true")]
    pub auto_purge: bool,

    /// How often the auto purge runs (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Repack the database after an auto purge has finished.
    /// Default: true
    #[serde(default = "default_true")]
    pub auto_repack: bool,

    /// Maximum rows deleted per table per transaction.
    /// Default and maximum: 998
    #[serde(default = "default_max_rows_per_batch")]
    pub max_rows_per_batch: u32,

    /// Batch passes one purge task may run before it is re-enqueued.
    /// Default: 1
    #[serde(default = "default_max_batches_per_run")]
    pub max_batches_per_run: u32,

    /// Seconds to wait before retrying after a transient database error.
    /// Default: 3
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,

    /// Consecutive transient failures tolerated before a purge is abandoned.
    /// Default: 10
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            keep_days: default_keep_days(),
            auto_purge: true,
            interval_hours: default_interval_hours(),
            auto_repack: true,
            max_rows_per_batch: default_max_rows_per_batch(),
            max_batches_per_run: default_max_batches_per_run(),
            retry_wait_secs: default_retry_wait_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keep_days() -> u32 {
    10
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_rows_per_batch() -> u32 {
    MAX_ROWS_TO_PURGE
}

fn default_max_batches_per_run() -> u32 {
    1
}

fn default_retry_wait_secs() -> u64 {
    3
}

fn default_max_retries() -> u32 {
    10
}

impl PurgeConfig {
    /// Get the auto purge interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.min(MAX_INTERVAL_HOURS) * 3600)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rows_per_batch == 0 || self.max_rows_per_batch > MAX_ROWS_TO_PURGE {
            return Err(ConfigError::Validation(format!(
                "purge.max_rows_per_batch must be between 1 and {MAX_ROWS_TO_PURGE}, got {}",
                self.max_rows_per_batch
            )));
        }
        if self.max_batches_per_run == 0 {
            return Err(ConfigError::Validation(
                "purge.max_batches_per_run must be at least 1".into(),
            ));
        }
        if self.auto_purge && self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "purge.interval_hours must be greater than 0 when auto_purge is enabled".into(),
            ));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(ConfigError::Validation(format!(
                "purge.interval_hours must be at most {MAX_INTERVAL_HOURS}, got {}",
                self.interval_hours
            )));
        }
        Ok(())
    }
}
