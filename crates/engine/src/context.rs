//! Per-operation context
//!
//! Carries the calling worker's shard and the intent locks it holds. The
//! lock manager itself lives outside this crate; the registry only asks it
//! whether the caller's preconditions hold.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strata_core::{Error, Result, ShardId};

/// Lock modes for database-level intent locking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// IS
    IntentShared,
    /// IX
    IntentExclusive,
    /// S
    Shared,
    /// X
    Exclusive,
}

impl LockMode {
    /// True if holding `self` satisfies a requirement for `requested`
    pub fn covers(self, requested: LockMode) -> bool {
        use LockMode::*;
        match (self, requested) {
            (Exclusive, _) => true,
            (Shared, IntentShared | Shared) => true,
            (IntentExclusive, IntentShared | IntentExclusive) => true,
            (IntentShared, IntentShared) => true,
            _ => false,
        }
    }
}

/// View of the locks held by one operation
pub trait Locker: Send + Sync {
    /// Is `db` locked in a mode covering `mode`?
    fn is_db_locked_for_mode(&self, db: &str, mode: LockMode) -> bool;

    /// Is the global lock held exclusively?
    fn is_global_exclusive(&self) -> bool;
}

/// Locker that reports every lock as held
///
/// For embedders without a lock manager; never use it where real mutual
/// exclusion is expected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocker;

impl Locker for NoopLocker {
    fn is_db_locked_for_mode(&self, _db: &str, _mode: LockMode) -> bool {
        true
    }

    fn is_global_exclusive(&self) -> bool {
        true
    }
}

/// Fixed set of held locks
#[derive(Debug, Default, Clone)]
pub struct HeldLocks {
    dbs: HashMap<String, LockMode>,
    global_exclusive: bool,
}

impl HeldLocks {
    /// No locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `db` in `mode`
    pub fn with_db(mut self, db: impl Into<String>, mode: LockMode) -> Self {
        self.dbs.insert(db.into(), mode);
        self
    }

    /// Hold the global lock exclusively (covers every database)
    pub fn with_global_exclusive(mut self) -> Self {
        self.global_exclusive = true;
        self
    }
}

impl Locker for HeldLocks {
    fn is_db_locked_for_mode(&self, db: &str, mode: LockMode) -> bool {
        self.global_exclusive || self.dbs.get(db).map_or(false, |held| held.covers(mode))
    }

    fn is_global_exclusive(&self) -> bool {
        self.global_exclusive
    }
}

/// Where an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientKind {
    /// External user connection
    #[default]
    User,
    /// Internal or direct-client operation
    Internal,
}

/// Context passed to every registry and statistics call
#[derive(Clone)]
pub struct OperationContext {
    shard: ShardId,
    locker: Arc<dyn Locker>,
    client: ClientKind,
}

impl OperationContext {
    /// Context for a worker on `shard`
    pub fn new(shard: ShardId, locker: Arc<dyn Locker>) -> Self {
        Self {
            shard,
            locker,
            client: ClientKind::User,
        }
    }

    /// Context for the calling thread's bound shard
    ///
    /// # Errors
    ///
    /// `UnboundThread` if the thread was never bound to a shard.
    pub fn for_current_thread(locker: Arc<dyn Locker>) -> Result<Self> {
        let shard = ShardId::current().ok_or(Error::UnboundThread)?;
        Ok(Self::new(shard, locker))
    }

    /// Set the client kind
    pub fn with_client(mut self, client: ClientKind) -> Self {
        self.client = client;
        self
    }

    /// Shard of the calling worker
    #[inline]
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Locks held by this operation
    pub fn locker(&self) -> &dyn Locker {
        &*self.locker
    }

    /// Client kind
    pub fn client(&self) -> ClientKind {
        self.client
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("shard", &self.shard)
            .field("client", &self.client)
            .finish()
    }
}
