//! Sharded catalog engine
//!
//! This crate holds the per-shard state that every worker consults on its
//! hot path:
//! - `DatabaseRegistry`: name → open database, replicated per shard
//! - `Top`: per-collection operation counters, merged on read
//! - `OperationContext`: the caller's shard, lock state and client kind
//!
//! Both structures are built on `strata_concurrency::ShardedLock`: readers
//! lock their own shard, writers lock every shard in ascending order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod database;
pub mod stats;

pub use context::{ClientKind, HeldLocks, LockMode, Locker, NoopLocker, OperationContext};
pub use database::{
    BackgroundJobs, CloseHooks, Database, DatabaseCatalogEntry, DatabaseRegistry,
    MemoryStorageEngine, NoBackgroundJobs, NoopCloseHooks, StorageEngine,
};
pub use stats::{
    CollectionData, LockType, LogicalOp, OperationLatencyHistogram, ReadWriteType, Top, UsageData,
};
