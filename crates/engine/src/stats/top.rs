//! Sharded per-collection operation statistics
//!
//! Every shard accumulates its own partial sums; readers merge all shards on
//! demand. A counter update touches only the recording worker's shard lock.
//! No update needs a cross-shard broadcast because shards hold independent
//! partial sums, never a shared pointer table.
//!
//! Merged reports are eventually consistent: a `record` racing a merge may
//! or may not be included.
//!
//! The most recently dropped collection is kept behind a mutex, fronted by
//! an atomic hash of its name. `record` only takes the mutex when the hash
//! of its own namespace matches.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde_json::{json, Map, Value};
use strata_concurrency::ShardedLock;
use strata_core::{RegistryConfig, Result, ShardId};
use tracing::debug;

use super::histogram::{OperationLatencyHistogram, ReadWriteType};
use super::usage::CollectionData;
use crate::context::{ClientKind, OperationContext};

/// Logical operation being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// Unknown / not categorized
    Invalid,
    /// Update
    Update,
    /// Insert
    Insert,
    /// Query
    Query,
    /// Get-more batch
    GetMore,
    /// Delete
    Delete,
    /// Kill cursors (counted in total only)
    KillCursors,
    /// Command
    Command,
}

/// Lock held while the operation ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// No collection lock
    NotLocked,
    /// Shared lock
    ReadLocked,
    /// Exclusive lock
    WriteLocked,
}

type UsageMap = FxHashMap<String, CollectionData>;

/// No collection drop pending
const NO_DROP_MARKER: u64 = 0;

fn drop_marker(ns: &str) -> u64 {
    let mut hasher = FxHasher::default();
    ns.hash(&mut hasher);
    hasher.finish().max(1)
}

/// Operation statistics aggregator
pub struct Top {
    usage: ShardedLock<UsageMap>,
    histograms: ShardedLock<OperationLatencyHistogram>,
    last_dropped: Mutex<Option<String>>,
    last_dropped_marker: AtomicU64,
    user_ops_only: bool,
}

impl Top {
    /// Aggregator with `config.shard_count` shards
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            usage: ShardedLock::new(config.shard_count, |_| UsageMap::default()),
            histograms: ShardedLock::new(config.shard_count, |_| {
                OperationLatencyHistogram::default()
            }),
            last_dropped: Mutex::new(None),
            last_dropped_marker: AtomicU64::new(NO_DROP_MARKER),
            user_ops_only: config.histogram_user_ops_only,
        })
    }

    /// Record one operation against namespace `ns`
    ///
    /// Namespaces starting with `?` are ignored. The first record for the
    /// most recently dropped collection is swallowed, since it is the
    /// in-flight operation that raced the drop.
    ///
    /// # Errors
    ///
    /// `InvalidShard` if the context's shard is out of range.
    pub fn record(
        &self,
        ctx: &OperationContext,
        ns: &str,
        logical_op: LogicalOp,
        lock_type: LockType,
        micros: u64,
        read_write_type: ReadWriteType,
    ) -> Result<()> {
        let shard = self.check_shard(ctx)?;
        if ns.starts_with('?') {
            return Ok(());
        }

        let marker = self.last_dropped_marker.load(Ordering::Acquire);
        if marker != NO_DROP_MARKER && marker == drop_marker(ns) {
            let mut last = self.last_dropped.lock();
            if last.as_deref() == Some(ns) {
                *last = None;
                self.last_dropped_marker
                    .store(NO_DROP_MARKER, Ordering::Release);
                return Ok(());
            }
        }

        let mut guard = self.usage.read(shard);
        let usage = &mut *guard;
        if !usage.contains_key(ns) {
            usage.insert(ns.to_string(), CollectionData::default());
        }
        if let Some(coll) = usage.get_mut(ns) {
            let count_latency = self.counts_in_histogram(ctx);
            record_into(coll, logical_op, lock_type, micros, read_write_type, count_latency);
        }
        Ok(())
    }

    /// Forget a collection's counters on every shard
    ///
    /// Shards are visited one at a time. For a single-collection drop the
    /// name is remembered so the next `record` for it is swallowed; a
    /// database drop does not do this.
    pub fn collection_dropped(&self, ns: &str, database_dropped: bool) {
        self.usage.for_each_shard(|_, usage| {
            usage.remove(ns);
        });

        if !database_dropped {
            let mut last = self.last_dropped.lock();
            *last = Some(ns.to_string());
            self.last_dropped_marker
                .store(drop_marker(ns), Ordering::Release);
        }
        debug!(target: "strata::stats", ns, database_dropped, "Dropped collection statistics");
    }

    /// Sum every shard's counters, sorted by namespace
    pub fn merge_all(&self) -> BTreeMap<String, CollectionData> {
        let mut all: BTreeMap<String, CollectionData> = BTreeMap::new();
        self.usage.for_each_shard(|_, usage| {
            for (ns, data) in usage.iter() {
                match all.get_mut(ns) {
                    Some(merged) => *merged += data,
                    None => {
                        all.insert(ns.clone(), data.clone());
                    }
                }
            }
        });
        all
    }

    /// Append one report object per namespace, in name order
    pub fn append(&self, out: &mut Map<String, Value>) {
        for (ns, data) in self.merge_all() {
            out.insert(ns, data.report());
        }
    }

    /// Report document for every namespace
    pub fn report(&self) -> Value {
        let mut totals = Map::new();
        self.append(&mut totals);
        Value::Object(totals)
    }

    /// Merged latency histogram of one namespace, as `{ns, latencyStats}`
    pub fn append_latency_stats(&self, ns: &str, include_histograms: bool) -> Value {
        let histogram = self
            .merge_all()
            .remove(ns)
            .map(|data| data.op_latency_histogram)
            .unwrap_or_default();
        json!({
            "ns": ns,
            "latencyStats": histogram.report(include_histograms),
        })
    }

    /// Count an operation in the global latency histogram
    ///
    /// # Errors
    ///
    /// `InvalidShard` if the context's shard is out of range.
    pub fn increment_global_latency_stats(
        &self,
        ctx: &OperationContext,
        latency_micros: u64,
        read_write_type: ReadWriteType,
    ) -> Result<()> {
        let shard = self.check_shard(ctx)?;
        if self.counts_in_histogram(ctx) {
            self.histograms
                .read(shard)
                .increment(latency_micros, read_write_type);
        }
        Ok(())
    }

    /// Count a multi-document transaction in the global histogram
    ///
    /// # Errors
    ///
    /// `InvalidShard` if the context's shard is out of range.
    pub fn increment_global_transaction_latency_stats(
        &self,
        ctx: &OperationContext,
        latency_micros: u64,
    ) -> Result<()> {
        let shard = self.check_shard(ctx)?;
        self.histograms
            .read(shard)
            .increment(latency_micros, ReadWriteType::Transaction);
        Ok(())
    }

    /// Global histogram merged across shards
    pub fn global_latency_stats(&self) -> OperationLatencyHistogram {
        let mut merged = OperationLatencyHistogram::default();
        self.histograms.for_each_shard(|_, histogram| {
            merged += &*histogram;
        });
        merged
    }

    /// Global histogram report
    pub fn append_global_latency_stats(&self, include_histograms: bool) -> Value {
        self.global_latency_stats().report(include_histograms)
    }

    fn check_shard(&self, ctx: &OperationContext) -> Result<ShardId> {
        ctx.shard().check(self.usage.shard_count())
    }

    fn counts_in_histogram(&self, ctx: &OperationContext) -> bool {
        !self.user_ops_only || ctx.client() == ClientKind::User
    }
}

impl std::fmt::Debug for Top {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Top")
            .field("shard_count", &self.usage.shard_count())
            .field("user_ops_only", &self.user_ops_only)
            .finish()
    }
}

fn record_into(
    coll: &mut CollectionData,
    logical_op: LogicalOp,
    lock_type: LockType,
    micros: u64,
    read_write_type: ReadWriteType,
    count_latency: bool,
) {
    if count_latency {
        coll.op_latency_histogram.increment(micros, read_write_type);
    }

    coll.total.inc(micros);

    match lock_type {
        LockType::WriteLocked => coll.write_lock.inc(micros),
        LockType::ReadLocked => coll.read_lock.inc(micros),
        LockType::NotLocked => {}
    }

    match logical_op {
        LogicalOp::Invalid | LogicalOp::KillCursors => {}
        LogicalOp::Update => coll.update.inc(micros),
        LogicalOp::Insert => coll.insert.inc(micros),
        LogicalOp::Query => coll.queries.inc(micros),
        LogicalOp::GetMore => coll.getmore.inc(micros),
        LogicalOp::Delete => coll.remove.inc(micros),
        LogicalOp::Command => coll.commands.inc(micros),
    }
}
