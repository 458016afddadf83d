//! Strata catalog - sharded database registry and operation statistics
//!
//! Every worker thread owns one shard. Hot-path reads (database lookup,
//! statistics updates) lock only the caller's shard; rare structural
//! changes (open, close) lock every shard in ascending order.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_catalog::{DatabaseRegistry, MemoryStorageEngine, NoopLocker, OperationContext};
//! use strata_catalog::{RegistryConfig, ShardId};
//! use std::sync::Arc;
//!
//! let config = RegistryConfig::with_shard_count(4);
//! let registry = DatabaseRegistry::new(&config, Arc::new(MemoryStorageEngine::new()))?;
//!
//! let ctx = OperationContext::new(ShardId::new(0), Arc::new(NoopLocker));
//! let (db, created) = registry.open_or_create(&ctx, "sales.orders")?;
//! ```
//!
//! # Architecture
//!
//! - `strata-core`: shard identity, names, configuration, errors
//! - `strata-concurrency`: `ShardedLock` and the per-shard `ObjectPool`
//! - `strata-engine`: the registry, statistics and operation context

pub use strata_concurrency::{
    DynPooled, ObjectPool, Pooled, Recyclable, ShardReadGuard, ShardWriteGuard, ShardedLock,
};
pub use strata_core::{
    bind_current_thread, db_name, eq_ignore_case, validate_db_name, Error, RegistryConfig, Result,
    ShardAssigner, ShardBinding, ShardId, CONFIG_FILE_NAME,
};
pub use strata_engine::*;
