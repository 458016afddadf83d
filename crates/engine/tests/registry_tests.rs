//! Database Registry Tests
//!
//! Validates the registry's externally visible behavior:
//! - Cross-shard consistency after open and close
//! - Case-insensitive uniqueness of open names
//! - Clean retry after a failed or panicking storage open
//! - Close-time hook ordering and close_all preconditions

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use strata_core::{Error, RegistryConfig, Result, ShardId};
use strata_engine::{
    BackgroundJobs, CloseHooks, Database, DatabaseCatalogEntry, DatabaseRegistry, HeldLocks,
    LockMode, MemoryStorageEngine, NoopLocker, OperationContext, StorageEngine,
};

const SHARDS: usize = 4;

fn ctx(shard: u16) -> OperationContext {
    OperationContext::new(ShardId::new(shard), Arc::new(NoopLocker))
}

fn registry_with(storage: Arc<dyn StorageEngine>) -> DatabaseRegistry {
    DatabaseRegistry::new(&RegistryConfig::with_shard_count(SHARDS), storage).unwrap()
}

fn registry() -> (DatabaseRegistry, Arc<MemoryStorageEngine>) {
    let storage = Arc::new(MemoryStorageEngine::new());
    (registry_with(storage.clone()), storage)
}

// ============================================================================
// Storage doubles
// ============================================================================

/// Fails (or panics) the first `failures` opens, then delegates
struct FlakyStorage {
    inner: MemoryStorageEngine,
    failures: AtomicUsize,
    panic_instead: bool,
}

impl FlakyStorage {
    fn new(failures: usize, panic_instead: bool) -> Self {
        Self {
            inner: MemoryStorageEngine::new(),
            failures: AtomicUsize::new(failures),
            panic_instead,
        }
    }
}

impl StorageEngine for FlakyStorage {
    fn database_entry(&self, name: &str) -> Result<Arc<dyn DatabaseCatalogEntry>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            if self.panic_instead {
                panic!("storage engine crashed opening {}", name);
            }
            return Err(Error::storage(format!("disk unavailable for {}", name)));
        }
        self.inner.database_entry(name)
    }

    fn close_database(&self, name: &str) -> Result<()> {
        self.inner.close_database(name)
    }
}

/// Records every close-time callback in order
#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<String>>,
}

impl CloseHooks for RecordingHooks {
    fn replication_checkpoint(&self, db: &Database) {
        self.events.lock().push(format!("checkpoint:{}", db.name()));
    }

    fn evict_uuid_catalog(&self, db: &Database) {
        assert!(!db.is_closed());
        self.events.lock().push(format!("uuid:{}", db.name()));
    }

    fn evict_namespace(&self, ns: &str) {
        self.events.lock().push(format!("ns:{}", ns));
    }
}

/// Holds every open at the gate until `parties` of them are in storage
struct GatedStorage {
    inner: MemoryStorageEngine,
    gate: Barrier,
}

impl GatedStorage {
    fn new(parties: usize) -> Self {
        Self {
            inner: MemoryStorageEngine::new(),
            gate: Barrier::new(parties),
        }
    }
}

impl StorageEngine for GatedStorage {
    fn database_entry(&self, name: &str) -> Result<Arc<dyn DatabaseCatalogEntry>> {
        self.gate.wait();
        self.inner.database_entry(name)
    }

    fn close_database(&self, name: &str) -> Result<()> {
        self.inner.close_database(name)
    }
}

/// Opens `names[i]` from shard `i`, all holding only the intent lock
fn open_concurrently(
    reg: &Arc<DatabaseRegistry>,
    names: &[&'static str],
) -> Vec<Result<(Arc<Database>, bool)>> {
    let handles: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(shard, &name)| {
            let reg = Arc::clone(reg);
            thread::spawn(move || {
                let locker = HeldLocks::new().with_db(name, LockMode::IntentShared);
                let ctx = OperationContext::new(ShardId::new(shard as u16), Arc::new(locker));
                reg.open_or_create(&ctx, name)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

struct BusyJobs {
    busy: AtomicBool,
}

impl BackgroundJobs for BusyJobs {
    fn in_progress_for_db(&self, _db: &str) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Open / Get
// ============================================================================

#[test]
fn test_open_visible_on_every_shard_as_same_handle() {
    let (reg, _) = registry();
    let (db, created) = reg.open_or_create(&ctx(1), "sales.orders").unwrap();
    assert!(created);

    for shard in 0..SHARDS as u16 {
        let seen = reg.get(&ctx(shard), "sales").unwrap().unwrap();
        assert!(Arc::ptr_eq(&seen, &db));
        assert_eq!(reg.names(ShardId::new(shard)).unwrap(), vec!["sales"]);
    }
}

#[test]
fn test_reopen_from_other_shard_is_not_created() {
    let (reg, _) = registry();
    let (first, _) = reg.open_or_create(&ctx(0), "sales").unwrap();
    let (second, created) = reg.open_or_create(&ctx(3), "sales.items").unwrap();
    assert!(!created);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_existing_storage_database_reports_not_created() {
    let (reg, storage) = registry();
    storage.create_collection("hr.people").unwrap();
    let (db, created) = reg.open_or_create(&ctx(0), "hr").unwrap();
    assert!(!created);
    assert!(db.catalog_entry().exists());
    assert_eq!(db.collection_namespaces(), vec!["hr.people".to_string()]);
}

#[test]
fn test_case_uniqueness_from_any_shard() {
    let (reg, _) = registry();
    reg.open_or_create(&ctx(0), "Inventory").unwrap();

    for shard in 0..SHARDS as u16 {
        let err = reg.open_or_create(&ctx(shard), "inventory.x").unwrap_err();
        match err {
            Error::NameCollision { requested, existing } => {
                assert_eq!(requested, "inventory");
                assert_eq!(existing, "Inventory");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(reg.get(&ctx(shard), "inventory").unwrap().is_none());
    }

    // Rejection leaves nothing behind
    assert!(reg
        .names_with_conflicting_casing(&ctx(2), "Inventory")
        .unwrap()
        .is_empty());
}

#[test]
fn test_get_requires_intent_lock() {
    let (reg, _) = registry();
    let locker = HeldLocks::new().with_db("a", LockMode::IntentShared);
    let ctx = OperationContext::new(ShardId::new(0), Arc::new(locker));
    assert!(reg.get(&ctx, "a.b").unwrap().is_none());

    let result = catch_unwind(AssertUnwindSafe(|| reg.get(&ctx, "other")));
    assert!(result.is_err());
}

// ============================================================================
// Racing Opens
// ============================================================================

#[test]
fn test_racing_opens_from_two_shards_share_one_handle() {
    let reg = Arc::new(registry_with(Arc::new(GatedStorage::new(2))));
    let results = open_concurrently(&reg, &["app", "app"]);

    let opened: Vec<(Arc<Database>, bool)> =
        results.into_iter().map(|r| r.unwrap()).collect();
    assert!(Arc::ptr_eq(&opened[0].0, &opened[1].0));
    // Only the opener storage saw first can report a creation
    assert!(opened.iter().filter(|(_, created)| *created).count() <= 1);
    assert!(!opened[0].0.is_closed());

    for shard in 0..SHARDS as u16 {
        let seen = reg.get(&ctx(shard), "app").unwrap().unwrap();
        assert!(Arc::ptr_eq(&seen, &opened[0].0));
        assert_eq!(reg.len(ShardId::new(shard)).unwrap(), 1);
    }
}

#[test]
fn test_racing_opens_differing_by_case_admit_one() {
    let reg = Arc::new(registry_with(Arc::new(GatedStorage::new(2))));
    let results = open_concurrently(&reg, &["Foo", "foo"]);

    let winners: Vec<&Arc<Database>> = results
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|(db, _)| db))
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_name_collision()))
            .count(),
        1
    );

    let winner = winners[0].name().to_string();
    for shard in 0..SHARDS as u16 {
        assert_eq!(reg.names(ShardId::new(shard)).unwrap(), vec![winner.clone()]);
        // The loser's claim is gone too
        assert!(reg
            .names_with_conflicting_casing(&ctx(shard), &winner)
            .unwrap()
            .is_empty());
    }
}

// ============================================================================
// Failure Cleanup
// ============================================================================

#[test]
fn test_failed_open_leaves_no_claim_and_retry_succeeds() {
    let storage = Arc::new(FlakyStorage::new(1, false));
    let reg = registry_with(storage);

    let err = reg.open_or_create(&ctx(2), "logs").unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(reg.get(&ctx(2), "logs").unwrap().is_none());
    assert!(reg
        .names_with_conflicting_casing(&ctx(2), "LOGS")
        .unwrap()
        .is_empty());

    let (db, created) = reg.open_or_create(&ctx(2), "logs").unwrap();
    assert!(created);
    assert_eq!(db.name(), "logs");
}

#[test]
fn test_panicking_open_leaves_no_claim() {
    let storage = Arc::new(FlakyStorage::new(1, true));
    let reg = registry_with(storage);

    let result = catch_unwind(AssertUnwindSafe(|| reg.open_or_create(&ctx(1), "metrics")));
    assert!(result.is_err());

    // Shard lock was not held across the panic, and the claim is gone
    assert!(reg
        .names_with_conflicting_casing(&ctx(1), "Metrics")
        .unwrap()
        .is_empty());
    let (_, created) = reg.open_or_create(&ctx(1), "metrics").unwrap();
    assert!(created);
}

// ============================================================================
// Close
// ============================================================================

#[test]
fn test_close_hook_order() {
    let storage = Arc::new(MemoryStorageEngine::new());
    storage.create_collection("shop.carts").unwrap();
    storage.create_collection("shop.users").unwrap();
    let hooks = Arc::new(RecordingHooks::default());
    let reg = registry_with(storage.clone()).with_close_hooks(hooks.clone());

    let (db, _) = reg.open_or_create(&ctx(0), "shop").unwrap();
    reg.close(&ctx(3), "shop", "test").unwrap();

    assert_eq!(
        *hooks.events.lock(),
        vec![
            "checkpoint:shop".to_string(),
            "uuid:shop".to_string(),
            "ns:shop.carts".to_string(),
            "ns:shop.users".to_string(),
        ]
    );
    assert!(db.is_closed());
    assert_eq!(storage.closed_databases(), vec!["shop".to_string()]);
    for shard in 0..SHARDS as u16 {
        assert!(reg.get(&ctx(shard), "shop").unwrap().is_none());
    }
}

#[test]
fn test_close_is_idempotent() {
    let (reg, storage) = registry();
    reg.open_or_create(&ctx(0), "tmp").unwrap();
    reg.close(&ctx(0), "tmp", "first").unwrap();
    reg.close(&ctx(0), "tmp", "second").unwrap();
    assert_eq!(storage.closed_databases(), vec!["tmp".to_string()]);
}

#[test]
fn test_reopen_after_close_is_new_instance() {
    let (reg, _) = registry();
    let (first, _) = reg.open_or_create(&ctx(0), "cycle").unwrap();
    reg.close(&ctx(0), "cycle", "restart").unwrap();
    let (second, created) = reg.open_or_create(&ctx(1), "cycle").unwrap();
    assert!(!created);
    assert_ne!(first.id(), second.id());
    assert!(first.is_closed());
    assert!(!second.is_closed());
}

#[test]
fn test_close_all_in_name_order() {
    let hooks = Arc::new(RecordingHooks::default());
    let (reg, storage) = registry();
    let reg = reg.with_close_hooks(hooks.clone());
    for name in ["charlie", "alpha", "bravo"] {
        reg.open_or_create(&ctx(0), name).unwrap();
    }

    reg.close_all(&ctx(2), "shutdown").unwrap();

    assert_eq!(
        storage.closed_databases(),
        vec!["alpha".to_string(), "bravo".to_string(), "charlie".to_string()]
    );
    for shard in 0..SHARDS as u16 {
        assert!(reg.names(ShardId::new(shard)).unwrap().is_empty());
    }
}

#[test]
#[should_panic(expected = "background operation")]
fn test_close_all_with_background_job_panics() {
    let jobs = Arc::new(BusyJobs {
        busy: AtomicBool::new(true),
    });
    let (reg, _) = registry();
    let reg = reg.with_background_jobs(jobs);
    reg.open_or_create(&ctx(0), "busy").unwrap();
    let _ = reg.close_all(&ctx(0), "shutdown");
}

#[test]
fn test_close_all_requires_global_lock() {
    let (reg, _) = registry();
    reg.open_or_create(&ctx(0), "keep").unwrap();
    let weak = OperationContext::new(
        ShardId::new(0),
        Arc::new(HeldLocks::new().with_db("keep", LockMode::Exclusive)),
    );
    let result = catch_unwind(AssertUnwindSafe(|| reg.close_all(&weak, "nope")));
    assert!(result.is_err());
    assert!(reg.get(&ctx(0), "keep").unwrap().is_some());
}
