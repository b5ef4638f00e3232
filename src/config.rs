//! Stream and destination configuration
//!
//! Partition granularity and rate-limit budgets are per-stream domain
//! parameters; they live here, never hard-coded in the run loop. The config
//! file is a single JSON document:
//!
//! ```json
//! {
//!   "checkpoint_dir": "./state/checkpoints",
//!   "table_root": "./state/table",
//!   "streams": [
//!     {
//!       "id": "taxi_trips",
//!       "source_url": "https://data.example.com/v1/trips",
//!       "epoch": "2024-01-01T00:00:00Z",
//!       "granularity": "1d",
//!       "rate": {
//!         "max_requests_per_minute": 60,
//!         "max_attempts": 5,
//!         "request_timeout_secs": 30
//!       }
//!     }
//!   ]
//! }
//! ```

use crate::planner::Granularity;
use crate::Cursor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error reading {path}: {reason}")]
    Io {
        /// Config file path
        path: String,
        /// Underlying error
        reason: String,
    },

    /// Parse error
    #[error("parse error: {0}")]
    Parse(String),

    /// Semantic validation error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Rate-limit and retry budget for one stream's source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Upstream request ceiling; 0 disables pacing
    #[serde(default = "default_requests_per_minute")]
    pub max_requests_per_minute: u32,
    /// Fetch attempts per partition before the run fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Hard timeout for any single upstream request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_requests_per_minute(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// One ingestable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier, used in checkpoint and table paths
    pub id: String,
    /// Base URL of the time-partitioned read API
    pub source_url: String,
    /// Start of the stream's domain; ingestion begins here
    pub epoch: DateTime<Utc>,
    /// Fixed partition width
    pub granularity: Granularity,
    /// Rate-limit budget for the stream's source
    #[serde(default)]
    pub rate: RateLimitConfig,
}

impl StreamConfig {
    /// The stream's epoch as a cursor.
    pub fn epoch_cursor(&self) -> Cursor {
        Cursor::from_millis(self.epoch.timestamp_millis())
    }

    /// Validate the stream entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Invalid("stream id cannot be empty".to_string()));
        }

        // Ids become file and directory names; keep them path-safe.
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "stream id '{}' may only contain [a-zA-Z0-9_-]",
                self.id
            )));
        }

        if !self.source_url.starts_with("http://") && !self.source_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "stream '{}': source_url must be an http(s) URL",
                self.id
            )));
        }

        if self.rate.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "stream '{}': max_attempts must be at least 1",
                self.id
            )));
        }

        if self.rate.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "stream '{}': request_timeout_secs must be at least 1",
                self.id
            )));
        }

        Ok(())
    }
}

/// Top-level configuration: destinations plus the stream catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory holding per-stream checkpoint documents
    pub checkpoint_dir: PathBuf,
    /// Root directory of the destination table store
    pub table_root: PathBuf,
    /// Configured streams
    pub streams: Vec<StreamConfig>,
}

impl IngestConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: IngestConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole document.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one stream must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !seen.insert(stream.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stream id '{}'",
                    stream.id
                )));
            }
        }

        Ok(())
    }

    /// Look up a stream by id.
    pub fn stream(&self, id: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.id == id)
    }
}
