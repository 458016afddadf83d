//! Per-shard recycling allocator
//!
//! Eliminates allocation overhead by reusing released objects.
//! Each shard keeps a FIFO free-list of reset-ready instances.
//!
//! # Key Behaviour
//!
//! - `acquire` pops the front of the calling shard's free-list and resets
//!   the object in place with the new arguments; only an empty free-list
//!   constructs a fresh instance.
//! - Release pushes onto the free-list of the shard current *at release
//!   time*, which need not be the acquiring shard. Pooled objects slowly
//!   migrate toward the busier shards.
//! - Objects are never destroyed by the pool and the free-lists are
//!   unbounded; they only shrink through `acquire`.
//!
//! Each free-list sits behind its own mutex on its own cache line. Only the
//! owning shard's worker touches it on the hot path, so the lock is
//! uncontended.
//!
//! # Example
//!
//! ```ignore
//! let pool: ObjectPool<Cursor> = ObjectPool::new(shard_count);
//!
//! // Scope-based release
//! {
//!     let cursor = pool.acquire(shard, CursorArgs { .. });
//!     // ... use the cursor ...
//! } // back on the current thread's shard
//!
//! // Manual release
//! let cursor = pool.acquire_detached(shard, args);
//! pool.release(shard, cursor);
//! ```

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::ShardId;
use tracing::debug;

/// An object the pool can construct and later reset for reuse
pub trait Recyclable: Send + 'static {
    /// Arguments for construction and reset
    type Args;

    /// Construct a fresh instance
    fn create(args: Self::Args) -> Self;

    /// Re-initialize a released instance in place
    ///
    /// Must clear every trace of the previous use.
    fn reset(&mut self, args: Self::Args);
}

/// Per-shard free-lists of `T`
pub struct ObjectPool<T: Recyclable> {
    free: Box<[CachePadded<Mutex<VecDeque<Box<T>>>>]>,
    created: AtomicU64,
}

impl<T: Recyclable> ObjectPool<T> {
    /// Pool with one empty free-list per shard
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "object pool needs at least one shard");
        let free = (0..shard_count)
            .map(|_| CachePadded::new(Mutex::new(VecDeque::new())))
            .collect();
        Self {
            free,
            created: AtomicU64::new(0),
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.free.len()
    }

    /// Acquire an object with scope-based release
    ///
    /// Dropping the handle returns the object to the shard bound to the
    /// dropping thread, or to `shard` when that thread has no binding.
    pub fn acquire(&self, shard: ShardId, args: T::Args) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            object: Some(self.acquire_detached(shard, args)),
            origin: shard,
        }
    }

    /// Acquire an object the caller must hand back with [`release`](Self::release)
    ///
    /// Dropping the box instead simply destroys the object.
    pub fn acquire_detached(&self, shard: ShardId, args: T::Args) -> Box<T> {
        let reused = self.list(shard).lock().pop_front();
        match reused {
            Some(mut object) => {
                object.reset(args);
                object
            }
            None => self.construct(args),
        }
    }

    /// Return an object to `shard`'s free-list
    pub fn release(&self, shard: ShardId, object: Box<T>) {
        self.list(shard).lock().push_back(object);
    }

    /// Pre-populate `shard`'s free-list up to `count` objects
    pub fn warmup(&self, shard: ShardId, count: usize, mut args: impl FnMut() -> T::Args) {
        let current = self.free_count(shard);
        if current >= count {
            return;
        }
        let fresh: Vec<Box<T>> = (current..count).map(|_| self.construct(args())).collect();
        self.list(shard).lock().extend(fresh);
        debug!(target: "strata::pool", %shard, count, "Warmed object pool");
    }

    /// Objects waiting on `shard`'s free-list
    pub fn free_count(&self, shard: ShardId) -> usize {
        self.list(shard).lock().len()
    }

    /// Objects waiting across every shard
    pub fn total_free(&self) -> usize {
        self.free.iter().map(|list| list.lock().len()).sum()
    }

    /// Instances constructed since the pool was created (reuse excluded)
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn construct(&self, args: T::Args) -> Box<T> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new(T::create(args))
    }

    fn list(&self, shard: ShardId) -> &Mutex<VecDeque<Box<T>>> {
        match self.free.get(shard.index()) {
            Some(list) => list,
            None => panic!(
                "{} out of range for object pool with {} shards",
                shard,
                self.free.len()
            ),
        }
    }
}

impl<T: Recyclable> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("shard_count", &self.free.len())
            .field("created", &self.created_count())
            .finish()
    }
}

/// Pooled object, recycled on drop
pub struct Pooled<'a, T: Recyclable> {
    pool: &'a ObjectPool<T>,
    object: Option<Box<T>>,
    origin: ShardId,
}

impl<'a, T: Recyclable> Pooled<'a, T> {
    /// Shard the object was acquired on
    pub fn origin(&self) -> ShardId {
        self.origin
    }

    /// Release now, to an explicit shard
    pub fn release_to(mut self, shard: ShardId) {
        if let Some(object) = self.object.take() {
            self.pool.release(shard, object);
        }
    }

    /// Detach from the pool; the caller takes over the manual release
    pub fn into_inner(mut self) -> Box<T> {
        match self.object.take() {
            Some(object) => object,
            None => unreachable!("pooled object taken before drop"),
        }
    }

    /// View the object through a capability type `D`
    ///
    /// The concrete type stays known to the returned handle, which recycles
    /// the object as a `T` when dropped.
    pub fn into_dyn<D: ?Sized + 'a>(
        self,
        view: fn(&T) -> &D,
        view_mut: fn(&mut T) -> &mut D,
    ) -> DynPooled<'a, D> {
        DynPooled {
            inner: Box::new(Erased {
                pooled: self,
                view,
                view_mut,
            }),
        }
    }

    fn get(&self) -> &T {
        match &self.object {
            Some(object) => object,
            None => unreachable!("pooled object taken before drop"),
        }
    }

    fn get_mut(&mut self) -> &mut T {
        match &mut self.object {
            Some(object) => object,
            None => unreachable!("pooled object taken before drop"),
        }
    }
}

impl<T: Recyclable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: Recyclable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<T: Recyclable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            let shard = ShardId::current()
                .filter(|s| s.index() < self.pool.shard_count())
                .unwrap_or(self.origin);
            self.pool.release(shard, object);
        }
    }
}

trait ErasedPooled<D: ?Sized> {
    fn view(&self) -> &D;
    fn view_mut(&mut self) -> &mut D;
}

struct Erased<'a, T: Recyclable, D: ?Sized> {
    pooled: Pooled<'a, T>,
    view: fn(&T) -> &D,
    view_mut: fn(&mut T) -> &mut D,
}

impl<T: Recyclable, D: ?Sized> ErasedPooled<D> for Erased<'_, T, D> {
    fn view(&self) -> &D {
        (self.view)(self.pooled.get())
    }

    fn view_mut(&mut self) -> &mut D {
        (self.view_mut)(self.pooled.get_mut())
    }
}

/// Pooled object seen through a capability type, recycled on drop
pub struct DynPooled<'a, D: ?Sized> {
    inner: Box<dyn ErasedPooled<D> + 'a>,
}

impl<D: ?Sized> Deref for DynPooled<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.inner.view()
    }
}

impl<D: ?Sized> DerefMut for DynPooled<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.inner.view_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_core::bind_current_thread;

    #[derive(Debug)]
    struct Buffer {
        owner: u32,
        bytes: Vec<u8>,
    }

    impl Recyclable for Buffer {
        type Args = u32;

        fn create(owner: u32) -> Self {
            Buffer {
                owner,
                bytes: Vec::new(),
            }
        }

        fn reset(&mut self, owner: u32) {
            self.owner = owner;
            self.bytes.clear();
        }
    }

    trait Describe {
        fn describe(&self) -> String;
        fn bump(&mut self);
    }

    impl Describe for Buffer {
        fn describe(&self) -> String {
            format!("{}:{}", self.owner, self.bytes.len())
        }

        fn bump(&mut self) {
            self.bytes.push(0);
        }
    }

    fn s(i: u16) -> ShardId {
        ShardId::new(i)
    }

    #[test]
    fn test_acquire_from_empty_pool_constructs() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(2);
        let buf = pool.acquire(s(0), 7);
        assert_eq!(buf.owner, 7);
        assert_eq!(pool.created_count(), 1);
        assert_eq!(pool.free_count(s(0)), 0);
    }

    #[test]
    fn test_drop_returns_to_origin_when_unbound() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(2);
        drop(pool.acquire(s(1), 1));
        assert_eq!(pool.free_count(s(1)), 1);
        assert_eq!(pool.free_count(s(0)), 0);
    }

    #[test]
    fn test_reuse_resets_instead_of_constructing() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(1);
        {
            let mut buf = pool.acquire(s(0), 1);
            buf.bytes.extend_from_slice(b"stale");
        }
        let buf = pool.acquire(s(0), 2);
        assert_eq!(buf.owner, 2);
        assert!(buf.bytes.is_empty(), "reset must clear prior state");
        assert!(buf.bytes.capacity() >= 5, "capacity survives reset");
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_free_list_is_fifo() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(1);
        let mut a = pool.acquire_detached(s(0), 1);
        let mut b = pool.acquire_detached(s(0), 2);
        a.bytes.push(1);
        b.bytes.extend_from_slice(&[1, 2, 3]);
        let (cap_a, cap_b) = (a.bytes.capacity(), b.bytes.capacity());
        pool.release(s(0), a);
        pool.release(s(0), b);

        let first = pool.acquire_detached(s(0), 3);
        let second = pool.acquire_detached(s(0), 4);
        assert_eq!(first.bytes.capacity(), cap_a);
        assert_eq!(second.bytes.capacity(), cap_b);
    }

    #[test]
    fn test_release_goes_to_current_shard() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(3);
        let buf = pool.acquire(s(0), 1);
        {
            let _binding = bind_current_thread(s(2));
            drop(buf);
        }
        assert_eq!(pool.free_count(s(0)), 0);
        assert_eq!(pool.free_count(s(2)), 1);
    }

    #[test]
    fn test_release_to_explicit_shard() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(2);
        let buf = pool.acquire(s(0), 1);
        assert_eq!(buf.origin(), s(0));
        buf.release_to(s(1));
        assert_eq!(pool.free_count(s(1)), 1);
        assert_eq!(pool.total_free(), 1);
    }

    #[test]
    fn test_manual_release() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(1);
        let buf = pool.acquire(s(0), 1).into_inner();
        assert_eq!(pool.free_count(s(0)), 0, "detached handle must not recycle");
        pool.release(s(0), buf);
        assert_eq!(pool.free_count(s(0)), 1);
    }

    #[test]
    fn test_dyn_handle_recycles_concrete_type() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(1);
        {
            let mut handle: DynPooled<'_, dyn Describe> = pool
                .acquire(s(0), 9)
                .into_dyn(|b| b, |b| b);
            handle.bump();
            assert_eq!(handle.describe(), "9:1");
        }
        assert_eq!(pool.free_count(s(0)), 1);
        let reused = pool.acquire(s(0), 4);
        assert_eq!(reused.describe(), "4:0");
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_warmup() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(2);
        pool.warmup(s(1), 4, || 0);
        assert_eq!(pool.free_count(s(1)), 4);
        assert_eq!(pool.created_count(), 4);

        // Idempotent at the same count
        pool.warmup(s(1), 4, || 0);
        assert_eq!(pool.created_count(), 4);

        // Later acquisitions reuse
        for i in 0..4 {
            pool.acquire(s(1), i).release_to(s(1));
        }
        assert_eq!(pool.created_count(), 4);
    }

    #[test]
    fn test_free_list_unbounded() {
        let pool: ObjectPool<Buffer> = ObjectPool::new(1);
        let held: Vec<_> = (0..100).map(|i| pool.acquire_detached(s(0), i)).collect();
        for b in held {
            pool.release(s(0), b);
        }
        assert_eq!(pool.free_count(s(0)), 100);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Acquire { shard: u16, owner: u32 },
        Release { pick: usize, shard: u16 },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u16..2, any::<u32>()).prop_map(|(shard, owner)| Step::Acquire { shard, owner }),
            (any::<usize>(), 0u16..2).prop_map(|(pick, shard)| Step::Release { pick, shard }),
        ]
    }

    fn addr(buf: &Buffer) -> usize {
        buf as *const Buffer as usize
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_free_lists_behave_as_fifo_queues(steps in proptest::collection::vec(step(), 0..64)) {
            let pool: ObjectPool<Buffer> = ObjectPool::new(2);
            let mut model: [VecDeque<usize>; 2] = [VecDeque::new(), VecDeque::new()];
            let mut held: Vec<Box<Buffer>> = Vec::new();
            let mut created = 0u64;

            for step in steps {
                match step {
                    Step::Acquire { shard, owner } => {
                        let expected = model[shard as usize].pop_front();
                        let buf = pool.acquire_detached(s(shard), owner);
                        match expected {
                            Some(front) => prop_assert_eq!(addr(&buf), front),
                            None => created += 1,
                        }
                        prop_assert_eq!(buf.owner, owner);
                        prop_assert!(buf.bytes.is_empty());
                        held.push(buf);
                    }
                    Step::Release { pick, shard } => {
                        if held.is_empty() {
                            continue;
                        }
                        let mut buf = held.swap_remove(pick % held.len());
                        buf.bytes.extend_from_slice(b"used");
                        model[shard as usize].push_back(addr(&buf));
                        pool.release(s(shard), buf);
                    }
                }
                prop_assert_eq!(pool.created_count(), created);
                prop_assert_eq!(pool.free_count(s(0)), model[0].len());
                prop_assert_eq!(pool.free_count(s(1)), model[1].len());
            }
        }
    }
}
