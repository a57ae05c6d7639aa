// Table catalog - schema registry plus per-table read/write exclusion

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tabletalk_core::{normalize_table_name, Error, Result, TableLookup, TableSchema};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};
use tracing::debug;

/// Registry of uploaded tables.
///
/// Schemas live behind a short-lived `parking_lot` lock. Each table name also owns a
/// `tokio` read/write lock: queries hold it shared from validation through execution,
/// uploads and deletes hold it exclusively while storage and catalog change.
pub struct TableCatalog {
    entries: Arc<RwLock<HashMap<String, TableSchema>>>,
    locks: LockMap,
}

type LockMap = Arc<DashMap<String, Arc<AsyncRwLock<()>>>>;

impl TableCatalog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Catalog pre-populated from persisted metadata.
    pub fn with_tables(tables: Vec<TableSchema>) -> Self {
        let catalog = Self::new();
        {
            let mut entries = catalog.entries.write();
            for schema in tables {
                entries.insert(schema.key(), schema);
            }
        }
        catalog
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncRwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncRwLock::new(())))
            .clone()
    }

    /// Store or replace an entry, waiting for in-flight readers of that name.
    pub async fn register(&self, schema: TableSchema) -> Result<()> {
        let lease = self.lock_for_write(&schema.name).await;
        lease.register(schema)
    }

    /// Remove an entry, waiting for in-flight readers of that name.
    pub async fn unregister(&self, name: &str) -> Result<TableSchema> {
        let lease = self.lock_for_write(name).await;
        lease.unregister()
    }

    pub fn get(&self, name: &str) -> Result<TableSchema> {
        self.entries
            .read()
            .get(&normalize_table_name(name))
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(&normalize_table_name(name))
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<TableSchema> {
        let mut tables: Vec<TableSchema> = self.entries.read().values().cloned().collect();
        tables.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        tables
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Shared lease on a table. Fails with `NotFound` if the table is absent once
    /// the lease is granted.
    pub async fn read(&self, name: &str) -> Result<TableReadLease> {
        let key = normalize_table_name(name);
        let guard = self.lock_for(&key).read_owned().await;
        let held = HeldLock::new(guard, key, &self.locks);
        let schema = self.get(name)?;
        debug!("read lease granted for '{}'", schema.name);
        Ok(TableReadLease {
            schema,
            _held: held,
        })
    }

    /// Exclusive lease on a table name, whether or not it is registered yet.
    pub async fn lock_for_write(&self, name: &str) -> TableWriteLease {
        let key = normalize_table_name(name);
        let guard = self.lock_for(&key).write_owned().await;
        debug!("write lease granted for '{}'", name);
        TableWriteLease {
            key: key.clone(),
            entries: Arc::clone(&self.entries),
            _held: HeldLock::new(guard, key, &self.locks),
        }
    }

    /// Number of per-name locks currently allocated.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

/// A granted guard that removes its name's lock from the map once nobody else
/// holds or waits on it.
struct HeldLock<G> {
    guard: Option<G>,
    key: String,
    locks: LockMap,
}

impl<G> HeldLock<G> {
    fn new(guard: G, key: String, locks: &LockMap) -> Self {
        Self {
            guard: Some(guard),
            key,
            locks: Arc::clone(locks),
        }
    }
}

impl<G> Drop for HeldLock<G> {
    fn drop(&mut self) {
        // The guard owns a clone of the lock; release it before counting.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TableLookup for TableCatalog {
    fn contains_table(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Shared access to one table. Writers to the same name wait until it is dropped.
pub struct TableReadLease {
    schema: TableSchema,
    _held: HeldLock<OwnedRwLockReadGuard<()>>,
}

impl TableReadLease {
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        &self.schema.name
    }
}

/// Exclusive access to one table name.
pub struct TableWriteLease {
    key: String,
    entries: Arc<RwLock<HashMap<String, TableSchema>>>,
    _held: HeldLock<OwnedRwLockWriteGuard<()>>,
}

impl TableWriteLease {
    pub fn table_name(&self) -> &str {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.entries.read().contains_key(&self.key)
    }

    pub fn register(&self, schema: TableSchema) -> Result<()> {
        if schema.key() != self.key {
            return Err(Error::Storage(format!(
                "lease for '{}' cannot register table '{}'",
                self.key, schema.name
            )));
        }
        self.entries.write().insert(self.key.clone(), schema);
        Ok(())
    }

    pub fn unregister(&self) -> Result<TableSchema> {
        self.entries
            .write()
            .remove(&self.key)
            .ok_or_else(|| Error::NotFound(self.key.clone()))
    }
}
