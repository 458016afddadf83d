//! Operation statistics
//!
//! [`Top`] keeps per-collection counters and latency histograms, one partial
//! sum per shard, merged when a report is requested.

mod histogram;
mod top;
mod usage;

pub use histogram::{bucket_for, OperationLatencyHistogram, ReadWriteType, LOWER_BOUNDS, MAX_BUCKETS};
pub use top::{LockType, LogicalOp, Top};
pub use usage::{CollectionData, UsageData};
