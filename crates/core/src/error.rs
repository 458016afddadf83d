//! Error types for the catalog registry
//!
//! This module defines the recoverable error conditions surfaced by the
//! registry, the statistics aggregator and configuration loading.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Caller bugs (missing intent locks, background jobs running during a
//! close-all, out-of-order lock acquisition) are not represented here: they
//! are assertion failures.

use std::io;
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the catalog registry
#[derive(Debug, Error)]
pub enum Error {
    /// A database with the same name in different letter case is already open
    #[error("db already exists with different case already have: [{existing}] trying to create [{requested}]")]
    NameCollision {
        /// Name passed to the open call
        requested: String,
        /// Open (or opening) name that differs only by case
        existing: String,
    },

    /// Empty or malformed database name / namespace
    #[error("invalid db name '{name}': {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Shard index outside the configured range
    #[error("shard {shard} out of range (shard count {shard_count})")]
    InvalidShard {
        /// Requested shard index
        shard: usize,
        /// Configured number of shards
        shard_count: usize,
    },

    /// Every shard has already been handed to a worker thread
    #[error("all {shard_count} shards are already assigned")]
    ShardsExhausted {
        /// Configured number of shards
        shard_count: usize,
    },

    /// The current thread was never bound to a shard
    #[error("current thread is not bound to a shard")]
    UnboundThread,

    /// Error reported by the storage engine
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (config file access)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build an `InvalidName` error
    pub fn invalid_name(name: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidName {
            name: name.into(),
            reason,
        }
    }

    /// Build a `Storage` error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// True for `NameCollision`
    pub fn is_name_collision(&self) -> bool {
        matches!(self, Error::NameCollision { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
