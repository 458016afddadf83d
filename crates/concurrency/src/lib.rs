//! Concurrency primitives for the catalog registry
//!
//! This crate implements the shard-replicated building blocks:
//! - ShardedLock: one mutex per worker shard; readers lock their own shard,
//!   writers lock every shard in ascending order
//! - ObjectPool: per-shard recycling free-lists that reset objects instead
//!   of reallocating them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pool;
pub mod sharded_lock;

pub use pool::{DynPooled, ObjectPool, Pooled, Recyclable};
pub use sharded_lock::{Replicas, ReplicasMut, ShardReadGuard, ShardWriteGuard, ShardedLock};
