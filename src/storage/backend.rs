//! Redb-backed storage connection.
//!
//! This module owns the connection lifecycle and the raw transactional
//! operations against the backend. The backend is treated as an opaque ACID
//! key-value engine: every operation here is one transaction, and redb
//! serializes write transactions, so the store needs no locking of its own.
//!
//! Entries are stored JSON-encoded under their key in a table named after
//! the configured namespace. A small meta table records the schema version
//! per namespace; bumping the version in [`StoreConfig`] recreates the data
//! table on the next open (the backend-level migration hook).
//!
//! All methods here are synchronous; the store runs them on the blocking
//! thread pool.
//!
//! [`StoreConfig`]: super::store::StoreConfig

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{KvError, Result};
use crate::storage::entry::{now_ms, Entry};
use crate::storage::store::StoreConfig;

/// Schema versions per namespace, so several stores can share one database
/// file without clobbering each other's migration state.
const META_TABLE: TableDefinition<'static, &'static str, u32> =
    TableDefinition::new("__stashkv_schema__");

/// One open connection to the backend, scoped to a namespace.
pub(crate) struct Backend {
    db: Database,
    namespace: String,
}

impl Backend {
    /// Opens (or creates) the database file and provisions the namespace.
    ///
    /// If the stored schema version differs from the configured one, the
    /// data table is dropped and recreated. A lock held by another process
    /// surfaces as [`KvError::Connection`]; handles that are already open
    /// keep working.
    pub(crate) fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KvError::Connection(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let db = Database::create(&config.path).map_err(|e| {
            warn!(
                path = %config.path.display(),
                error = %e,
                "could not open database; is another process using it?"
            );
            KvError::Connection(e.to_string())
        })?;

        let backend = Self {
            db,
            namespace: config.namespace.clone(),
        };
        backend.provision(config.version)?;
        Ok(backend)
    }

    /// Creates the data table and applies the schema-version migration.
    fn provision(&self, version: u32) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let stored = {
            let mut meta = txn
                .open_table(META_TABLE)
                .map_err(|e| KvError::Connection(e.to_string()))?;
            let stored = meta
                .get(self.namespace.as_str())
                .map_err(|e| KvError::Connection(e.to_string()))?
                .map(|guard| guard.value());
            meta.insert(self.namespace.as_str(), version)
                .map_err(|e| KvError::Connection(e.to_string()))?;
            stored
        };

        if let Some(existing) = stored {
            if existing != version {
                debug!(
                    namespace = %self.namespace,
                    from = existing,
                    to = version,
                    "schema version changed, recreating table"
                );
                txn.delete_table(self.table())
                    .map_err(|e| KvError::Connection(e.to_string()))?;
            }
        }

        {
            let _table = txn
                .open_table(self.table())
                .map_err(|e| KvError::Connection(e.to_string()))?;
        }

        txn.commit().map_err(|e| KvError::Connection(e.to_string()))
    }

    fn table(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.namespace)
    }

    fn encode(entry: &Entry) -> Result<Vec<u8>> {
        serde_json::to_vec(entry).map_err(|e| KvError::Serialization {
            key: entry.key.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Entry> {
        serde_json::from_slice(bytes).map_err(|e| KvError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn read_err(context: &str, e: impl std::fmt::Display) -> KvError {
        KvError::ReadFailed {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    fn write_err(context: &str, e: impl std::fmt::Display) -> KvError {
        KvError::WriteFailed {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    /// Reads the raw entry for a key, stale or not.
    pub(crate) fn fetch(&self, key: &str) -> Result<Option<Entry>> {
        let context = format!("key {key:?}");
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Self::read_err(&context, e))?;
        let table = txn
            .open_table(self.table())
            .map_err(|e| Self::read_err(&context, e))?;
        let guard = table.get(key).map_err(|e| Self::read_err(&context, e))?;
        match guard {
            Some(guard) => Ok(Some(Self::decode(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts one entry in its own write transaction.
    ///
    /// `created_at` of an existing record is preserved; `updated_at` is
    /// always stamped with the current time.
    pub(crate) fn upsert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Entry> {
        let context = format!("key {key:?}");
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        let entry = {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;

            let mut entry = Entry::new(key, value, ttl);
            let existing = table.get(key).map_err(|e| Self::write_err(&context, e))?;
            if let Some(ref guard) = existing {
                if let Ok(previous) = Self::decode(key, guard.value()) {
                    entry.created_at = previous.created_at;
                }
            }
            drop(existing);

            let encoded = Self::encode(&entry)?;
            table
                .insert(key, encoded.as_slice())
                .map_err(|e| Self::write_err(&context, e))?;
            entry
        };
        txn.commit().map_err(|e| Self::write_err(&context, e))?;
        Ok(entry)
    }

    /// Upserts a batch of entries in a single write transaction; either all
    /// writes commit or none do.
    pub(crate) fn upsert_all(
        &self,
        items: Vec<(String, serde_json::Value, Option<Duration>)>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let context = format!("batch of {} keys", items.len());
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;
            for (key, value, ttl) in items {
                let mut entry = Entry::new(&key, value, ttl);
                let existing = table
                    .get(key.as_str())
                    .map_err(|e| Self::write_err(&context, e))?;
                if let Some(ref guard) = existing {
                    if let Ok(previous) = Self::decode(&key, guard.value()) {
                        entry.created_at = previous.created_at;
                    }
                }
                drop(existing);

                let encoded = Self::encode(&entry)?;
                table
                    .insert(key.as_str(), encoded.as_slice())
                    .map_err(|e| Self::write_err(&context, e))?;
            }
        }
        txn.commit().map_err(|e| Self::write_err(&context, e))
    }

    /// Re-applies a TTL to a live entry without touching its payload.
    ///
    /// Fails with [`KvError::KeyNotFound`] if the key is absent or already
    /// stale; touch never resurrects an expired entry.
    pub(crate) fn touch(&self, key: &str, ttl: Duration) -> Result<Entry> {
        let context = format!("key {key:?}");
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        let entry = {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;

            let mut entry = match table.get(key).map_err(|e| Self::write_err(&context, e))? {
                Some(guard) => Self::decode(key, guard.value())?,
                None => {
                    return Err(KvError::KeyNotFound {
                        key: key.to_string(),
                    })
                }
            };

            let now = now_ms();
            if entry.is_expired_at(now) {
                return Err(KvError::KeyNotFound {
                    key: key.to_string(),
                });
            }

            entry.expiry = Some(now + ttl.as_millis() as u64);
            entry.updated_at = now;

            let encoded = Self::encode(&entry)?;
            table
                .insert(key, encoded.as_slice())
                .map_err(|e| Self::write_err(&context, e))?;
            entry
        };
        txn.commit().map_err(|e| Self::write_err(&context, e))?;
        Ok(entry)
    }

    /// Removes a key only if its record is stale at `now`, re-checking
    /// inside the write transaction. A fresh value written after the caller
    /// observed staleness survives; a record a concurrent sweep already
    /// purged reports `false`. Returns whether a record was removed.
    pub(crate) fn remove_if_stale(&self, key: &str, now: u64) -> Result<bool> {
        let context = format!("key {key:?}");
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        let removed = {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;
            let stale = match table.get(key).map_err(|e| Self::write_err(&context, e))? {
                Some(guard) => Self::decode(key, guard.value())?.is_expired_at(now),
                None => false,
            };
            if stale {
                table
                    .remove(key)
                    .map_err(|e| Self::write_err(&context, e))?;
            }
            stale
        };
        txn.commit().map_err(|e| Self::write_err(&context, e))?;
        Ok(removed)
    }

    /// Removes one key. Returns whether a record existed. Idempotent.
    pub(crate) fn remove(&self, key: &str) -> Result<bool> {
        let context = format!("key {key:?}");
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        let removed = {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;
            let removed = table
                .remove(key)
                .map_err(|e| Self::write_err(&context, e))?
                .is_some();
            removed
        };
        txn.commit().map_err(|e| Self::write_err(&context, e))?;
        Ok(removed)
    }

    /// Removes a batch of keys in one write transaction. Missing keys are
    /// not an error.
    pub(crate) fn remove_all(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let context = format!("batch of {} keys", keys.len());
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(&context, e))?;
        let mut removed = 0u64;
        {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(&context, e))?;
            for key in keys {
                if table
                    .remove(key.as_str())
                    .map_err(|e| Self::write_err(&context, e))?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(|e| Self::write_err(&context, e))?;
        Ok(removed)
    }

    /// Reads every record in the namespace, stale entries included.
    /// Enumeration never mutates the backend.
    pub(crate) fn scan(&self) -> Result<Vec<Entry>> {
        let context = "full scan";
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Self::read_err(context, e))?;
        let table = txn
            .open_table(self.table())
            .map_err(|e| Self::read_err(context, e))?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(|e| Self::read_err(context, e))? {
            let (key, value) = item.map_err(|e| Self::read_err(context, e))?;
            entries.push(Self::decode(key.value(), value.value())?);
        }
        Ok(entries)
    }

    /// Deletes every stale record (`expiry <= now`, never `None`) in one
    /// write transaction. Partial failure aborts the whole sweep.
    ///
    /// Returns the purged keys in scan order.
    pub(crate) fn sweep(&self, now: u64) -> Result<Vec<String>> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| KvError::Cleanup(e.to_string()))?;
        let purged = {
            let mut table = txn
                .open_table(self.table())
                .map_err(|e| KvError::Cleanup(e.to_string()))?;

            let mut stale = Vec::new();
            for item in table.iter().map_err(|e| KvError::Cleanup(e.to_string()))? {
                let (key, value) = item.map_err(|e| KvError::Cleanup(e.to_string()))?;
                if let Ok(entry) = Self::decode(key.value(), value.value()) {
                    if entry.expiry.is_some() && entry.is_expired_at(now) {
                        stale.push(entry.key);
                    }
                }
            }

            for key in &stale {
                table
                    .remove(key.as_str())
                    .map_err(|e| KvError::Cleanup(e.to_string()))?;
            }
            stale
        };
        txn.commit().map_err(|e| KvError::Cleanup(e.to_string()))?;
        Ok(purged)
    }

    /// Drops and recreates the data table, wiping the namespace.
    pub(crate) fn wipe(&self) -> Result<()> {
        let context = "clear";
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Self::write_err(context, e))?;
        txn.delete_table(self.table())
            .map_err(|e| Self::write_err(context, e))?;
        {
            let _table = txn
                .open_table(self.table())
                .map_err(|e| Self::write_err(context, e))?;
        }
        txn.commit().map_err(|e| Self::write_err(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn test_config(dir: &tempfile::TempDir) -> StoreConfig {
        StoreConfig::new(dir.path().join("test.redb"))
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("nested/deeper/kv.redb");
        let backend = Backend::open(&StoreConfig::new(path.clone())).unwrap();
        backend.upsert("k", json!(1), None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(&test_config(&dir)).unwrap();

        let first = backend.upsert("k", json!("v1"), None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = backend.upsert("k", json!("v2"), None).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.value, json!("v2"));
    }

    #[test]
    fn test_sweep_skips_entries_without_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(&test_config(&dir)).unwrap();

        backend.upsert("forever", json!(1), None).unwrap();
        backend
            .upsert("brief", json!(2), Some(Duration::from_millis(1)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let purged = backend.sweep(now_ms()).unwrap();

        assert_eq!(purged, vec!["brief".to_string()]);
        assert!(backend.fetch("forever").unwrap().is_some());
        assert!(backend.fetch("brief").unwrap().is_none());
    }

    #[test]
    fn test_remove_if_stale_spares_live_and_absent_records() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(&test_config(&dir)).unwrap();

        backend.upsert("live", json!(1), None).unwrap();
        backend
            .upsert("brief", json!(2), Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert!(!backend.remove_if_stale("live", now_ms()).unwrap());
        assert!(backend.fetch("live").unwrap().is_some());

        assert!(backend.remove_if_stale("brief", now_ms()).unwrap());
        // Already purged: a second attempt reports nothing removed.
        assert!(!backend.remove_if_stale("brief", now_ms()).unwrap());
        assert!(!backend.remove_if_stale("never-existed", now_ms()).unwrap());
    }

    #[test]
    fn test_version_bump_recreates_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let backend = Backend::open(&config).unwrap();
            backend.upsert("k", json!(1), None).unwrap();
        }

        let upgraded = Backend::open(&config.clone().with_version(2)).unwrap();
        assert!(upgraded.fetch("k").unwrap().is_none());
    }

    #[test]
    fn test_reopen_with_same_version_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let backend = Backend::open(&config).unwrap();
            backend.upsert("k", json!({"a": 1}), None).unwrap();
        }

        let reopened = Backend::open(&config).unwrap();
        let entry = reopened.fetch("k").unwrap().unwrap();
        assert_eq!(entry.value, json!({"a": 1}));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let main = Backend::open(&config).unwrap();
            main.upsert("k", json!("main"), None).unwrap();
        }

        let other = Backend::open(&config.clone().with_namespace("other")).unwrap();
        assert!(other.fetch("k").unwrap().is_none());
        other.upsert("k", json!("other"), None).unwrap();

        drop(other);
        let main = Backend::open(&config).unwrap();
        assert_eq!(main.fetch("k").unwrap().unwrap().value, json!("main"));
    }
}
