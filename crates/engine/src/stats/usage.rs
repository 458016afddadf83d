//! Per-collection usage counters

use serde::Serialize;
use serde_json::{json, Value};
use std::ops::AddAssign;

use super::histogram::OperationLatencyHistogram;

/// Total time and number of operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageData {
    /// Summed latency, microseconds
    pub time: u64,
    /// Operation count
    pub count: u64,
}

impl UsageData {
    /// Count one operation
    #[inline]
    pub fn inc(&mut self, micros: u64) {
        self.time += micros;
        self.count += 1;
    }

    /// Activity between two samples
    ///
    /// A counter that went backwards (drop, restart) reports `newer` as is
    /// rather than a negative delta.
    pub fn delta(older: &UsageData, newer: &UsageData) -> UsageData {
        UsageData {
            time: newer.time.checked_sub(older.time).unwrap_or(newer.time),
            count: newer.count.checked_sub(older.count).unwrap_or(newer.count),
        }
    }
}

impl AddAssign<&UsageData> for UsageData {
    fn add_assign(&mut self, other: &UsageData) {
        self.time += other.time;
        self.count += other.count;
    }
}

/// Counters for one collection, by lock type and operation category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionData {
    /// Every operation
    pub total: UsageData,
    /// Operations under a read lock
    pub read_lock: UsageData,
    /// Operations under a write lock
    pub write_lock: UsageData,
    /// Queries
    pub queries: UsageData,
    /// Get-more batches
    pub getmore: UsageData,
    /// Inserts
    pub insert: UsageData,
    /// Updates
    pub update: UsageData,
    /// Removes
    pub remove: UsageData,
    /// Commands
    pub commands: UsageData,
    /// Latency histogram for the collection
    pub op_latency_histogram: OperationLatencyHistogram,
}

impl CollectionData {
    /// Per-counter activity between two samples; the histogram is not diffed
    pub fn delta(older: &CollectionData, newer: &CollectionData) -> CollectionData {
        CollectionData {
            total: UsageData::delta(&older.total, &newer.total),
            read_lock: UsageData::delta(&older.read_lock, &newer.read_lock),
            write_lock: UsageData::delta(&older.write_lock, &newer.write_lock),
            queries: UsageData::delta(&older.queries, &newer.queries),
            getmore: UsageData::delta(&older.getmore, &newer.getmore),
            insert: UsageData::delta(&older.insert, &newer.insert),
            update: UsageData::delta(&older.update, &newer.update),
            remove: UsageData::delta(&older.remove, &newer.remove),
            commands: UsageData::delta(&older.commands, &newer.commands),
            op_latency_histogram: OperationLatencyHistogram::default(),
        }
    }

    /// Report document: one `{time, count}` object per counter
    pub fn report(&self) -> Value {
        json!({
            "total": self.total,
            "readLock": self.read_lock,
            "writeLock": self.write_lock,
            "queries": self.queries,
            "getmore": self.getmore,
            "insert": self.insert,
            "update": self.update,
            "remove": self.remove,
            "commands": self.commands,
        })
    }
}

impl AddAssign<&CollectionData> for CollectionData {
    fn add_assign(&mut self, other: &CollectionData) {
        self.total += &other.total;
        self.read_lock += &other.read_lock;
        self.write_lock += &other.write_lock;
        self.queries += &other.queries;
        self.getmore += &other.getmore;
        self.insert += &other.insert;
        self.update += &other.update;
        self.remove += &other.remove;
        self.commands += &other.commands;
        self.op_latency_histogram += &other.op_latency_histogram;
    }
}
