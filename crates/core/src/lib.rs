//! Core types for the Strata catalog registry
//!
//! This crate defines the foundational types used throughout the registry:
//! - Error: Error type hierarchy
//! - ShardId: Shard identity, assignment and worker-thread binding
//! - Names: Namespace → database name parsing and validation
//! - RegistryConfig: Startup configuration (`registry.toml`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod name;
pub mod shard;

pub use config::{RegistryConfig, CONFIG_FILE_NAME, DEFAULT_SHARD_COUNT, MAX_SHARD_COUNT};
pub use error::{Error, Result};
pub use name::{db_name, eq_ignore_case, validate_db_name, MAX_DB_NAME_LEN};
pub use shard::{bind_current_thread, ShardAssigner, ShardBinding, ShardId};
