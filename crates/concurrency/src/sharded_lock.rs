//! Scalable reader/writer lock built from one mutex per shard
//!
//! # Design
//!
//! - One `parking_lot::Mutex<T>` per shard, each on its own cache line
//! - `read(shard)`: locks only that shard. Readers on different shards never
//!   touch the same lock word.
//! - `write()`: locks every shard in ascending index order and releases them
//!   in reverse. Any two writers converge on the same order, so they cannot
//!   deadlock against each other.
//!
//! The data lives inside the lock: a shard's replica of the state can only
//! be reached through its guard.
//!
//! # Lock Order
//!
//! A thread must never request a guard on a `ShardedLock` it already holds a
//! guard on (shard or full). Debug builds track held guards per thread and
//! panic on such a re-entrant acquisition instead of deadlocking.

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::iter::Map;
use std::ops::{Deref, DerefMut};
use std::slice;
use strata_core::ShardId;

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(0);

#[cfg(debug_assertions)]
mod order {
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    /// Marks one sharded lock as held by the current thread.
    pub(super) struct Held(usize);

    impl Held {
        pub(super) fn enter(lock_id: usize) -> Held {
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                assert!(
                    !held.contains(&lock_id),
                    "sharded lock {} re-acquired by a thread already holding it; \
                     shard locks must be taken in ascending order, once",
                    lock_id
                );
                held.push(lock_id);
            });
            Held(lock_id)
        }
    }

    impl Drop for Held {
        fn drop(&mut self) {
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                if let Some(pos) = held.iter().rposition(|&id| id == self.0) {
                    held.remove(pos);
                }
            });
        }
    }
}

/// Reader/writer lock with one private mutex per shard
pub struct ShardedLock<T> {
    shards: Box<[CachePadded<Mutex<T>>]>,
    #[cfg(debug_assertions)]
    id: usize,
}

impl<T> ShardedLock<T> {
    /// Create a lock with `shard_count` replicas, built by `init`
    ///
    /// # Panics
    ///
    /// If `shard_count` is zero or does not fit a `ShardId`.
    pub fn new(shard_count: usize, mut init: impl FnMut(ShardId) -> T) -> Self {
        assert!(shard_count > 0, "sharded lock needs at least one shard");
        assert!(
            shard_count <= usize::from(u16::MAX) + 1,
            "shard count {} exceeds ShardId range",
            shard_count
        );
        let shards = (0..shard_count)
            .map(|i| CachePadded::new(Mutex::new(init(ShardId::new(i as u16)))))
            .collect();
        Self {
            shards,
            #[cfg(debug_assertions)]
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of shards
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Lock one shard
    ///
    /// Contends only with writers and with other users of the same shard.
    /// The guard gives exclusive access to that shard's replica, so the
    /// owning shard may mutate its own copy under it.
    ///
    /// # Panics
    ///
    /// If `shard` is out of range.
    #[inline]
    pub fn read(&self, shard: ShardId) -> ShardReadGuard<'_, T> {
        let slot = self.slot(shard);
        #[cfg(debug_assertions)]
        let held = order::Held::enter(self.id);
        ShardReadGuard {
            guard: slot.lock(),
            #[cfg(debug_assertions)]
            _held: held,
        }
    }

    /// Lock every shard, in ascending order
    pub fn write(&self) -> ShardWriteGuard<'_, T> {
        #[cfg(debug_assertions)]
        let held = order::Held::enter(self.id);
        let mut guards = Vec::with_capacity(self.shards.len());
        for slot in self.shards.iter() {
            guards.push(slot.lock());
        }
        ShardWriteGuard {
            guards,
            #[cfg(debug_assertions)]
            _held: held,
        }
    }

    /// Visit each shard in turn, holding only one shard lock at a time
    ///
    /// Gives no cross-shard atomicity: a concurrent `read` on an already
    /// visited shard may land before `f` has seen the later shards.
    pub fn for_each_shard(&self, mut f: impl FnMut(ShardId, &mut T)) {
        for (i, slot) in self.shards.iter().enumerate() {
            #[cfg(debug_assertions)]
            let _held = order::Held::enter(self.id);
            let mut guard = slot.lock();
            f(ShardId::new(i as u16), &mut *guard);
        }
    }

    fn slot(&self, shard: ShardId) -> &Mutex<T> {
        match self.shards.get(shard.index()) {
            Some(slot) => slot,
            None => panic!(
                "{} out of range for sharded lock with {} shards",
                shard,
                self.shards.len()
            ),
        }
    }
}

impl<T> std::fmt::Debug for ShardedLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedLock")
            .field("shard_count", &self.shards.len())
            .finish()
    }
}

/// Guard over one shard's replica
pub struct ShardReadGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    #[cfg(debug_assertions)]
    _held: order::Held,
}

impl<T> Deref for ShardReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ShardReadGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Guard over every shard's replica
///
/// Released in descending shard order on drop.
pub struct ShardWriteGuard<'a, T> {
    guards: Vec<MutexGuard<'a, T>>,
    #[cfg(debug_assertions)]
    _held: order::Held,
}

/// Replicas of a [`ShardWriteGuard`], in shard order
pub type Replicas<'s, 'a, T> =
    Map<slice::Iter<'s, MutexGuard<'a, T>>, fn(&'s MutexGuard<'a, T>) -> &'s T>;

/// Mutable replicas of a [`ShardWriteGuard`], in shard order
pub type ReplicasMut<'s, 'a, T> =
    Map<slice::IterMut<'s, MutexGuard<'a, T>>, fn(&'s mut MutexGuard<'a, T>) -> &'s mut T>;

impl<'a, T> ShardWriteGuard<'a, T> {
    /// One shard's replica
    pub fn shard(&self, shard: ShardId) -> &T {
        &self.guards[shard.index()]
    }

    /// One shard's replica, mutably
    pub fn shard_mut(&mut self, shard: ShardId) -> &mut T {
        &mut self.guards[shard.index()]
    }

    /// All replicas in shard order
    pub fn iter<'s>(&'s self) -> Replicas<'s, 'a, T> {
        let replica: fn(&'s MutexGuard<'a, T>) -> &'s T = |guard| &**guard;
        self.guards.iter().map(replica)
    }

    /// All replicas in shard order, mutably
    pub fn iter_mut<'s>(&'s mut self) -> ReplicasMut<'s, 'a, T> {
        let replica: fn(&'s mut MutexGuard<'a, T>) -> &'s mut T = |guard| &mut **guard;
        self.guards.iter_mut().map(replica)
    }
}

impl<T> Drop for ShardWriteGuard<'_, T> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
