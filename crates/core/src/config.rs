//! Registry configuration via `registry.toml`
//!
//! Read once at process start. The shard count is the fixed upper bound on
//! concurrently active worker threads and is never resized at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "registry.toml";

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Largest accepted shard count
pub const MAX_SHARD_COUNT: usize = 1024;

/// Registry configuration loaded from `registry.toml`.
///
/// # Example
///
/// ```toml
/// shard_count = 32
/// histogram_user_ops_only = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Number of shards (maximum concurrent worker threads).
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Only count user-connection operations in latency histograms.
    #[serde(default = "default_true")]
    pub histogram_user_ops_only: bool,
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_true() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            histogram_user_ops_only: true,
        }
    }
}

impl RegistryConfig {
    /// Default config with a different shard count
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            shard_count,
            ..Self::default()
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if `shard_count` is zero or above [`MAX_SHARD_COUNT`].
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || self.shard_count > MAX_SHARD_COUNT {
            return Err(Error::Config(format!(
                "shard_count must be between 1 and {}, got {}",
                MAX_SHARD_COUNT, self.shard_count
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata catalog registry configuration
#
# Number of shards: the maximum number of concurrently active worker
# threads. Each worker is bound to one shard for its lifetime.
shard_count = 16

# Only count operations issued by user connections in latency histograms.
# Per-collection time/count counters always include every operation.
histogram_user_ops_only = true
"#
    }
}
