//! Operation latency histogram
//!
//! Separate histograms for reads, writes, commands and multi-document
//! transactions. Bucket lower bounds are powers of two up to 1024µs, then
//! alternate `2^k` and `1.5·2^k` up to `1.5·2^30`µs.
//!
//! Not synchronized; the aggregator keeps one per shard and merges on read.

use serde_json::{json, Value};
use std::ops::AddAssign;

/// Number of histogram buckets
pub const MAX_BUCKETS: usize = 51;

/// Inclusive lower bound, in microseconds, of each bucket
pub const LOWER_BOUNDS: [u64; MAX_BUCKETS] = lower_bounds();

const fn lower_bounds() -> [u64; MAX_BUCKETS] {
    let mut bounds = [0u64; MAX_BUCKETS];
    let mut i = 1;
    while i <= 10 {
        bounds[i] = 1u64 << i;
        i += 1;
    }
    let mut exp = 11;
    let mut idx = 11;
    while exp <= 30 {
        bounds[idx] = 1u64 << exp;
        bounds[idx + 1] = 3u64 << (exp - 1);
        idx += 2;
        exp += 1;
    }
    bounds
}

/// Which histogram an operation lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadWriteType {
    /// Command
    Command,
    /// Read
    Read,
    /// Write
    Write,
    /// Multi-document transaction
    Transaction,
}

/// Bucket index for a latency in microseconds
#[inline]
pub fn bucket_for(latency_micros: u64) -> usize {
    // LOWER_BOUNDS[0] == 0, so at least one bound is <= latency
    LOWER_BOUNDS.partition_point(|&bound| bound <= latency_micros) - 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistogramData {
    buckets: [u64; MAX_BUCKETS],
    entry_count: u64,
    sum: u64,
}

impl Default for HistogramData {
    fn default() -> Self {
        Self {
            buckets: [0; MAX_BUCKETS],
            entry_count: 0,
            sum: 0,
        }
    }
}

impl HistogramData {
    fn increment(&mut self, latency_micros: u64) {
        self.buckets[bucket_for(latency_micros)] += 1;
        self.entry_count += 1;
        self.sum += latency_micros;
    }

    fn report(&self, include_histograms: bool) -> Value {
        let mut out = json!({
            "latency": self.sum,
            "ops": self.entry_count,
        });
        if include_histograms {
            let histogram: Vec<Value> = self
                .buckets
                .iter()
                .zip(LOWER_BOUNDS.iter())
                .filter(|(count, _)| **count > 0)
                .map(|(count, micros)| json!({ "micros": micros, "count": count }))
                .collect();
            out["histogram"] = Value::Array(histogram);
        }
        out
    }
}

impl AddAssign<&HistogramData> for HistogramData {
    fn add_assign(&mut self, other: &HistogramData) {
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *mine += theirs;
        }
        self.entry_count += other.entry_count;
        self.sum += other.sum;
    }
}

/// Latency histograms for the four operation types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationLatencyHistogram {
    reads: HistogramData,
    writes: HistogramData,
    commands: HistogramData,
    transactions: HistogramData,
}

impl OperationLatencyHistogram {
    /// Count one operation
    pub fn increment(&mut self, latency_micros: u64, kind: ReadWriteType) {
        self.data_mut(kind).increment(latency_micros);
    }

    /// Operations counted for `kind`
    pub fn ops(&self, kind: ReadWriteType) -> u64 {
        self.data(kind).entry_count
    }

    /// Summed latency for `kind`, in microseconds
    pub fn latency(&self, kind: ReadWriteType) -> u64 {
        self.data(kind).sum
    }

    /// Count in one bucket for `kind`
    pub fn bucket_count(&self, kind: ReadWriteType, bucket: usize) -> u64 {
        self.data(kind).buckets[bucket]
    }

    /// JSON report; `include_histograms` adds the non-empty buckets
    pub fn report(&self, include_histograms: bool) -> Value {
        json!({
            "reads": self.reads.report(include_histograms),
            "writes": self.writes.report(include_histograms),
            "commands": self.commands.report(include_histograms),
            "transactions": self.transactions.report(include_histograms),
        })
    }

    fn data(&self, kind: ReadWriteType) -> &HistogramData {
        match kind {
            ReadWriteType::Read => &self.reads,
            ReadWriteType::Write => &self.writes,
            ReadWriteType::Command => &self.commands,
            ReadWriteType::Transaction => &self.transactions,
        }
    }

    fn data_mut(&mut self, kind: ReadWriteType) -> &mut HistogramData {
        match kind {
            ReadWriteType::Read => &mut self.reads,
            ReadWriteType::Write => &mut self.writes,
            ReadWriteType::Command => &mut self.commands,
            ReadWriteType::Transaction => &mut self.transactions,
        }
    }
}

impl AddAssign<&OperationLatencyHistogram> for OperationLatencyHistogram {
    fn add_assign(&mut self, other: &OperationLatencyHistogram) {
        self.reads += &other.reads;
        self.writes += &other.writes;
        self.commands += &other.commands;
        self.transactions += &other.transactions;
    }
}
