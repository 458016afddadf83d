//! Collaborators invoked by the database registry
//!
//! The storage engine's on-disk catalog, the replication log and the UUID /
//! namespace caches live outside this crate. The registry reaches them only
//! through these traits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{Error, Result};

use super::Database;

/// Storage engine's catalog record for one database
pub trait DatabaseCatalogEntry: Send + Sync {
    /// Did the database exist on the storage side before it was opened?
    fn exists(&self) -> bool;

    /// Full `<db>.<collection>` namespaces of its collections
    fn collection_namespaces(&self) -> Vec<String>;
}

/// Storage engine operations used by the registry
pub trait StorageEngine: Send + Sync {
    /// Fetch (or prepare) the catalog entry for `name`
    ///
    /// May block; the registry never calls it under a shard lock.
    fn database_entry(&self, name: &str) -> Result<Arc<dyn DatabaseCatalogEntry>>;

    /// Release storage-side resources for a closed database
    fn close_database(&self, name: &str) -> Result<()>;
}

/// Eviction hooks run when a database is closed, in declaration order
pub trait CloseHooks: Send + Sync {
    /// Replication log bookkeeping for the closing database
    fn replication_checkpoint(&self, _db: &Database) {}

    /// Drop the database's collections from the UUID catalog
    fn evict_uuid_catalog(&self, _db: &Database) {}

    /// Drop one collection namespace from the namespace/UUID cache
    fn evict_namespace(&self, _ns: &str) {}
}

/// Close hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCloseHooks;

impl CloseHooks for NoopCloseHooks {}

/// Registry of running background maintenance jobs (index builds etc.)
pub trait BackgroundJobs: Send + Sync {
    /// Is a job running against database `db`?
    fn in_progress_for_db(&self, db: &str) -> bool;
}

/// No background jobs ever run
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackgroundJobs;

impl BackgroundJobs for NoBackgroundJobs {
    fn in_progress_for_db(&self, _db: &str) -> bool {
        false
    }
}

#[derive(Debug)]
struct MemoryEntry {
    existed: bool,
    namespaces: Vec<String>,
}

impl DatabaseCatalogEntry for MemoryEntry {
    fn exists(&self) -> bool {
        self.existed
    }

    fn collection_namespaces(&self) -> Vec<String> {
        self.namespaces.clone()
    }
}

/// Process-local storage engine with no persistence
///
/// A database "exists" once it has been opened through it or declared with
/// [`create_collection`](Self::create_collection).
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    databases: Mutex<BTreeMap<String, BTreeSet<String>>>,
    closes: Mutex<Vec<String>>,
}

impl MemoryStorageEngine {
    /// Empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare collection `ns` (`<db>.<collection>`), creating its database
    pub fn create_collection(&self, ns: &str) -> Result<()> {
        let db = strata_core::db_name(ns)?;
        let mut databases = self.databases.lock();
        let collections = databases.entry(db.to_string()).or_default();
        if ns.len() > db.len() + 1 {
            collections.insert(ns.to_string());
        }
        Ok(())
    }

    /// Does the engine know database `name`?
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().contains_key(name)
    }

    /// Names passed to `close_database`, in call order
    pub fn closed_databases(&self) -> Vec<String> {
        self.closes.lock().clone()
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn database_entry(&self, name: &str) -> Result<Arc<dyn DatabaseCatalogEntry>> {
        let mut databases = self.databases.lock();
        let existed = databases.contains_key(name);
        let namespaces = databases
            .entry(name.to_string())
            .or_default()
            .iter()
            .cloned()
            .collect();
        Ok(Arc::new(MemoryEntry {
            existed,
            namespaces,
        }))
    }

    fn close_database(&self, name: &str) -> Result<()> {
        if !self.databases.lock().contains_key(name) {
            return Err(Error::storage(format!("unknown database '{}'", name)));
        }
        self.closes.lock().push(name.to_string());
        Ok(())
    }
}
