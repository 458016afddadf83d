//! Shard identity and worker-thread binding
//!
//! Every worker thread owns exactly one shard for its whole lifetime.
//! Shards are handed out once each by a [`ShardAssigner`] and recorded in a
//! thread-local by [`bind_current_thread`].
//!
//! Registry, statistics and pool operations take the shard explicitly; the
//! thread binding only exists so a worker can build its own operation
//! context, and so scope-based pool release knows where "here" is.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::MAX_SHARD_COUNT;
use crate::error::{Error, Result};

thread_local! {
    static CURRENT_SHARD: Cell<Option<ShardId>> = const { Cell::new(None) };
}

/// Index of one shard, in `[0, shard_count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(u16);

impl ShardId {
    /// Create a shard id
    pub const fn new(index: u16) -> Self {
        ShardId(index)
    }

    /// Index usable for slice access
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Validate against a shard count
    pub fn check(self, shard_count: usize) -> Result<Self> {
        if self.index() < shard_count {
            Ok(self)
        } else {
            Err(Error::InvalidShard {
                shard: self.index(),
                shard_count,
            })
        }
    }

    /// Shard bound to the calling thread, if any
    pub fn current() -> Option<ShardId> {
        CURRENT_SHARD.with(|c| c.get())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Hands out each shard id once, in ascending order
#[derive(Debug)]
pub struct ShardAssigner {
    next: AtomicUsize,
    shard_count: usize,
}

impl ShardAssigner {
    /// Assigner for `shard_count` shards
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is above [`MAX_SHARD_COUNT`].
    pub fn new(shard_count: usize) -> Self {
        assert!(
            shard_count <= MAX_SHARD_COUNT,
            "shard assigner limited to {} shards, got {}",
            MAX_SHARD_COUNT,
            shard_count
        );
        Self {
            next: AtomicUsize::new(0),
            shard_count,
        }
    }

    /// Claim the next free shard
    ///
    /// # Errors
    ///
    /// `ShardsExhausted` once every shard has been handed out.
    pub fn assign(&self) -> Result<ShardId> {
        let exhausted = || Error::ShardsExhausted {
            shard_count: self.shard_count,
        };
        let claimed = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.shard_count).then_some(n + 1)
            })
            .map_err(|_| exhausted())?;
        u16::try_from(claimed).map(ShardId).map_err(|_| exhausted())
    }

    /// Number of shards already handed out
    pub fn assigned(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Configured shard count
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

/// Thread binding; clears the thread's shard on drop
#[derive(Debug)]
pub struct ShardBinding {
    shard: ShardId,
    previous: Option<ShardId>,
}

impl ShardBinding {
    /// Shard bound by this guard
    pub fn shard(&self) -> ShardId {
        self.shard
    }
}

impl Drop for ShardBinding {
    fn drop(&mut self) {
        CURRENT_SHARD.with(|c| c.set(self.previous));
    }
}

/// Bind the calling thread to `shard` until the returned guard drops
pub fn bind_current_thread(shard: ShardId) -> ShardBinding {
    let previous = CURRENT_SHARD.with(|c| c.replace(Some(shard)));
    ShardBinding { shard, previous }
}
