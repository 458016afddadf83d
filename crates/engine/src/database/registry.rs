//! Sharded registry of open databases
//!
//! Every shard keeps its own replica of the name → database map behind its
//! own lock, so a lookup only ever touches the caller's shard.
//!
//! # Consistency
//!
//! Whenever no writer is in flight, every shard maps a name either to
//! nothing or to the same `Arc<Database>`. Writers (`open_or_create`'s
//! broadcast, `close`, `close_all`) hold every shard lock while they mutate,
//! so the invariant is restored before any lock is released.
//!
//! # Per-name lifecycle
//!
//! ```text
//! absent ──claim──▶ opening ──broadcast──▶ open ──close──▶ absent
//!                      │
//!                      └──storage failure──▶ absent
//! ```
//!
//! `opening` is a tombstone placed in the claiming shard only. Readers there
//! see it as absent, the case-collision check sees it as taken. Other shards
//! report the name as absent until the broadcast lands.
//!
//! Callers hold at least the database's intent lock. Opens of one name that
//! race from different shards are settled under the write lock, so a name
//! is only ever broadcast once per open lifetime.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use strata_concurrency::ShardedLock;
use strata_core::{db_name, eq_ignore_case, Error, RegistryConfig, Result, ShardId};
use tracing::{debug, info, warn};

use super::storage::{BackgroundJobs, CloseHooks, NoBackgroundJobs, NoopCloseHooks, StorageEngine};
use super::Database;
use crate::context::{LockMode, OperationContext};

#[derive(Debug, Clone)]
enum Slot {
    /// Creation in progress on this shard
    Opening,
    Open(Arc<Database>),
}

type DbCache = FxHashMap<String, Slot>;

/// Open databases, replicated per shard
pub struct DatabaseRegistry {
    caches: ShardedLock<DbCache>,
    storage: Arc<dyn StorageEngine>,
    hooks: Arc<dyn CloseHooks>,
    background: Arc<dyn BackgroundJobs>,
}

impl DatabaseRegistry {
    /// Empty registry with `config.shard_count` shards
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation.
    pub fn new(config: &RegistryConfig, storage: Arc<dyn StorageEngine>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            caches: ShardedLock::new(config.shard_count, |_| DbCache::default()),
            storage,
            hooks: Arc::new(NoopCloseHooks),
            background: Arc::new(NoBackgroundJobs),
        })
    }

    /// Use `hooks` for close-time eviction
    pub fn with_close_hooks(mut self, hooks: Arc<dyn CloseHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use `jobs` for the close-all precondition check
    pub fn with_background_jobs(mut self, jobs: Arc<dyn BackgroundJobs>) -> Self {
        self.background = jobs;
        self
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.caches.shard_count()
    }

    /// Look up an open database
    ///
    /// Touches only the caller's shard. An unopened (or still opening)
    /// database is `Ok(None)`, not an error.
    ///
    /// # Errors
    ///
    /// `InvalidName` for a malformed namespace, `InvalidShard` for a context
    /// outside this registry's shard range.
    ///
    /// # Panics
    ///
    /// If the caller does not hold the database in at least IS mode.
    pub fn get(&self, ctx: &OperationContext, ns: &str) -> Result<Option<Arc<Database>>> {
        let name = db_name(ns)?;
        let shard = self.check_shard(ctx)?;
        assert!(
            ctx.locker()
                .is_db_locked_for_mode(name, LockMode::IntentShared),
            "get({}) requires the database to be locked in at least IS mode",
            name
        );

        let cache = self.caches.read(shard);
        Ok(match cache.get(name) {
            Some(Slot::Open(db)) => Some(Arc::clone(db)),
            Some(Slot::Opening) | None => None,
        })
    }

    /// Return the open database, opening it first if needed
    ///
    /// The second tuple element is `true` when the storage engine had no
    /// such database before this call.
    ///
    /// The storage engine call runs without any shard lock held. On any
    /// failure (error or panic) the claim on the caller's shard is removed,
    /// so a retry starts from a clean absent state.
    ///
    /// Openers racing on one name from different shards settle under the
    /// write lock: the first to broadcast wins, later ones return the
    /// winner's handle (with `false`) and drop their own. A racing opener
    /// of a name differing only by case fails with `NameCollision` there.
    ///
    /// # Errors
    ///
    /// `NameCollision` if an open or opening name differs only by case,
    /// `InvalidName`, `InvalidShard`, or
    /// the storage engine's error unchanged.
    ///
    /// # Panics
    ///
    /// If the caller does not hold the database in at least IS mode.
    pub fn open_or_create(
        &self,
        ctx: &OperationContext,
        ns: &str,
    ) -> Result<(Arc<Database>, bool)> {
        let name = db_name(ns)?;
        let shard = self.check_shard(ctx)?;
        assert!(
            ctx.locker()
                .is_db_locked_for_mode(name, LockMode::IntentShared),
            "open_or_create({}) requires the database to be locked",
            name
        );

        {
            let mut cache = self.caches.read(shard);
            if let Some(Slot::Open(db)) = cache.get(name) {
                return Ok((Arc::clone(db), false));
            }

            if let Some(existing) = conflicting_casing(&cache, name).into_iter().next() {
                return Err(Error::NameCollision {
                    requested: name.to_string(),
                    existing,
                });
            }

            cache.insert(name.to_string(), Slot::Opening);
        }

        let mut claim = OpeningClaim {
            caches: &self.caches,
            shard,
            name,
            armed: true,
        };

        let entry = self.storage.database_entry(name)?;
        let created = !entry.exists();
        let db = Arc::new(Database::new(name, entry));

        let mut all = self.caches.write();

        // Open slots agree on every shard under the write lock, so the
        // caller's shard speaks for all of them.
        let settled = all.shard(shard);
        if let Some(Slot::Open(winner)) = settled.get(name) {
            let winner = Arc::clone(winner);
            drop(all);
            debug!(
                target: "strata::catalog",
                db = name,
                id = %winner.id(),
                %shard,
                "Concurrent open finished first, adopting its handle"
            );
            return Ok((winner, false));
        }
        if let Some(existing) = open_with_conflicting_casing(settled, name) {
            drop(all);
            return Err(Error::NameCollision {
                requested: name.to_string(),
                existing,
            });
        }

        claim.disarm();
        for cache in all.iter_mut() {
            cache.insert(name.to_string(), Slot::Open(Arc::clone(&db)));
        }
        debug_assert!(
            conflicting_casing(all.shard(shard), name).is_empty(),
            "case-conflicting names present after opening {}",
            name
        );
        drop(all);

        info!(
            target: "strata::catalog",
            db = name,
            id = %db.id(),
            %shard,
            created,
            "Opened database"
        );
        Ok((db, created))
    }

    /// Close one database
    ///
    /// Holds every shard lock for the whole teardown. Runs the close hooks
    /// (replication checkpoint, UUID catalog eviction, per-collection
    /// namespace eviction), shuts the handle down, closes it in the storage
    /// engine, then removes it from every shard. Closing an unopened
    /// database is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `InvalidShard`, or the storage engine's close error.
    /// The registry is already consistent when a close error is returned.
    ///
    /// # Panics
    ///
    /// If the caller does not hold the global lock exclusively.
    pub fn close(&self, ctx: &OperationContext, ns: &str, reason: &str) -> Result<()> {
        let name = db_name(ns)?;
        let shard = self.check_shard(ctx)?;
        assert!(
            ctx.locker().is_global_exclusive(),
            "close({}) requires the global lock in X mode",
            name
        );

        let mut all = self.caches.write();
        let db = match all.shard(shard).get(name) {
            Some(Slot::Open(db)) => Arc::clone(db),
            Some(Slot::Opening) | None => return Ok(()),
        };

        let closed = self.teardown(&db, reason);
        for cache in all.iter_mut() {
            cache.remove(name);
        }
        drop(all);
        closed
    }

    /// Close every open database
    ///
    /// # Errors
    ///
    /// `InvalidShard`, or the first storage engine close error. Every
    /// database is torn down and every shard cleared regardless.
    ///
    /// # Panics
    ///
    /// If the caller does not hold the global lock exclusively, or a
    /// background job is running on any open database.
    pub fn close_all(&self, ctx: &OperationContext, reason: &str) -> Result<()> {
        let shard = self.check_shard(ctx)?;
        assert!(
            ctx.locker().is_global_exclusive(),
            "close_all requires the global lock in X mode"
        );

        let mut all = self.caches.write();
        let mut open: Vec<Arc<Database>> = all
            .shard(shard)
            .values()
            .filter_map(|slot| match slot {
                Slot::Open(db) => Some(Arc::clone(db)),
                Slot::Opening => None,
            })
            .collect();
        open.sort_by(|a, b| a.name().cmp(b.name()));

        for db in &open {
            assert!(
                !self.background.in_progress_for_db(db.name()),
                "cannot close database {} while a background operation is in progress",
                db.name()
            );
        }

        let mut first_error = None;
        for db in &open {
            debug!(target: "strata::catalog", db = db.name(), "close_all closing database");
            if let Err(e) = self.teardown(db, reason) {
                first_error.get_or_insert(e);
            }
        }
        for cache in all.iter_mut() {
            cache.clear();
        }
        drop(all);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Open (or opening) names equal to `name` ignoring case, but not identical
    ///
    /// Scans only the caller's shard.
    pub fn names_with_conflicting_casing(
        &self,
        ctx: &OperationContext,
        name: &str,
    ) -> Result<BTreeSet<String>> {
        let shard = self.check_shard(ctx)?;
        Ok(conflicting_casing(&self.caches.read(shard), name))
    }

    /// Sorted names of the databases open on `shard`
    pub fn names(&self, shard: ShardId) -> Result<Vec<String>> {
        let shard = shard.check(self.shard_count())?;
        let cache = self.caches.read(shard);
        let mut names: Vec<String> = cache
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Number of databases open on `shard`
    pub fn len(&self, shard: ShardId) -> Result<usize> {
        let shard = shard.check(self.shard_count())?;
        let cache = self.caches.read(shard);
        Ok(cache
            .values()
            .filter(|slot| matches!(slot, Slot::Open(_)))
            .count())
    }

    fn check_shard(&self, ctx: &OperationContext) -> Result<ShardId> {
        ctx.shard().check(self.shard_count())
    }

    fn teardown(&self, db: &Database, reason: &str) -> Result<()> {
        self.hooks.replication_checkpoint(db);
        self.hooks.evict_uuid_catalog(db);
        for ns in db.collection_namespaces() {
            self.hooks.evict_namespace(&ns);
        }
        db.shutdown(reason);
        self.storage.close_database(db.name()).map_err(|e| {
            warn!(target: "strata::catalog", db = db.name(), error = %e, "Storage engine close failed");
            e
        })
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("shard_count", &self.shard_count())
            .finish()
    }
}

fn conflicting_casing(cache: &DbCache, name: &str) -> BTreeSet<String> {
    cache
        .keys()
        .filter(|existing| eq_ignore_case(existing, name) && existing.as_str() != name)
        .cloned()
        .collect()
}

fn open_with_conflicting_casing(cache: &DbCache, name: &str) -> Option<String> {
    cache
        .iter()
        .find(|(existing, slot)| {
            matches!(slot, Slot::Open(_))
                && eq_ignore_case(existing, name)
                && existing.as_str() != name
        })
        .map(|(existing, _)| existing.clone())
}

/// Removes an `Opening` claim unless disarmed
struct OpeningClaim<'a> {
    caches: &'a ShardedLock<DbCache>,
    shard: ShardId,
    name: &'a str,
    armed: bool,
}

impl OpeningClaim<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OpeningClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut cache = self.caches.read(self.shard);
        if matches!(cache.get(self.name), Some(Slot::Opening)) {
            cache.remove(self.name);
        }
    }
}
