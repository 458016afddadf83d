//! Open databases and the sharded registry that tracks them
//!
//! A [`Database`] is the in-memory representative of one open logical
//! database. It is created once per name by
//! [`DatabaseRegistry::open_or_create`] and shared, as the same `Arc`, by
//! every shard's map until [`DatabaseRegistry::close`] removes it.

mod registry;
mod storage;

pub use registry::DatabaseRegistry;
pub use storage::{
    BackgroundJobs, CloseHooks, DatabaseCatalogEntry, MemoryStorageEngine, NoBackgroundJobs,
    NoopCloseHooks, StorageEngine,
};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

/// One open logical database
pub struct Database {
    name: String,
    id: Uuid,
    entry: Arc<dyn DatabaseCatalogEntry>,
    closed: AtomicBool,
}

impl Database {
    /// Wrap a storage catalog entry
    pub fn new(name: impl Into<String>, entry: Arc<dyn DatabaseCatalogEntry>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            entry,
            closed: AtomicBool::new(false),
        }
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of this open instance; a reopen gets a new one
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Storage engine catalog entry
    pub fn catalog_entry(&self) -> &Arc<dyn DatabaseCatalogEntry> {
        &self.entry
    }

    /// Namespaces of the database's collections
    pub fn collection_namespaces(&self) -> Vec<String> {
        self.entry.collection_namespaces()
    }

    /// Has `shutdown` run?
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the database down; runs once per instance
    pub(crate) fn shutdown(&self, reason: &str) {
        let already = self.closed.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "database {} shut down twice", self.name);
        info!(target: "strata::catalog", db = %self.name, id = %self.id, reason, "Closing database");
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
