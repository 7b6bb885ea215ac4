//! The public `KvStore` surface.
//!
//! Wraps the backend connection with lazy, deduplicated initialization, the
//! event subscriber registry and the background cleanup task. All operations
//! are async and run their backend transaction on the blocking thread pool.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{KvError, Result};
use crate::events::{self, Event, EventKind, Subscribers, SubscriptionId};
use crate::storage::backend::Backend;
use crate::storage::cleanup::CleanupTask;
use crate::storage::entry::{now_ms, StoreStats};

/// Default interval between background cleanup sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(60_000);

/// Store configuration with builder-style setters.
///
/// # Example
///
/// ```ignore
/// use stashkv::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::new("/var/lib/app/kv.redb")
///     .with_namespace("sessions")
///     .with_version(2)
///     .with_cleanup_interval(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the backend database file.
    pub path: PathBuf,
    /// Table name inside the database. Stores with different namespaces can
    /// share one file without seeing each other's keys.
    pub namespace: String,
    /// Schema version. Bumping it recreates the namespace on next open.
    pub version: u32,
    /// Interval between background cleanup sweeps (default: 60 seconds).
    pub cleanup_interval: Duration,
}

impl StoreConfig {
    /// Creates a configuration with defaults: namespace `"main"`, version 1,
    /// 60 second cleanup interval.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespace: "main".to_string(),
            version: 1,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Sets the namespace (backend table name).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the schema version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the background cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Options for `get_opts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// When `true`, returns the raw stored value without the liveness check
    /// or the lazy delete. Meant for internal consistency checks where
    /// re-triggering deletion mid-read would be wrong. Default: `false`.
    pub skip_expiry_check: bool,
}

/// Options for `keys`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeysOptions {
    /// When `true`, stale keys are included in the listing. Default: `false`.
    pub include_expired: bool,
}

/// Shared state behind every `KvStore` clone.
pub(crate) struct Inner {
    config: StoreConfig,
    backend: OnceCell<Arc<Backend>>,
    subscribers: Mutex<Subscribers>,
    cleanup: Mutex<Option<CleanupTask>>,
    cleanup_autostarted: AtomicBool,
    closed: AtomicBool,
}

/// A persistent, expiring key-value store.
///
/// Values are arbitrary JSON payloads. Entries may carry a TTL; stale entries
/// are never returned by reads and are purged lazily on access plus eagerly
/// by a background sweep. Mutations emit [`Event`]s to registered observers.
///
/// `KvStore` is `Clone` and cheap to share: clones see the same data, the
/// same subscriptions and the same cleanup task. Construct it once at
/// application start and hand it to every consumer.
///
/// # Example
///
/// ```ignore
/// use stashkv::{KvStore, StoreConfig};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let store = KvStore::open(StoreConfig::new("app.redb")).await?;
///
/// store.set("session:1", json!({"user": "alice"}), Some(Duration::from_secs(3600))).await?;
/// let session = store.get("session:1").await?;
///
/// store.close();
/// ```
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<Inner>,
}

impl KvStore {
    /// Creates a store without touching disk. The backend connection opens
    /// lazily on first use; concurrent first callers share one pending
    /// initialization.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backend: OnceCell::new(),
                subscribers: Mutex::new(Subscribers::new()),
                cleanup: Mutex::new(None),
                cleanup_autostarted: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a store and eagerly opens the backend connection.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Connection`] if the database cannot be opened or
    /// the schema migration fails.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config);
        store.ensure_ready().await?;
        Ok(store)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Returns the configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns the live backend handle, opening it on first call.
    ///
    /// All concurrent callers await the same pending open; two connections
    /// are never opened for one store. The cleanup task starts once the
    /// first open succeeds.
    async fn ensure_ready(&self) -> Result<Arc<Backend>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KvError::Closed);
        }

        let config = self.inner.config.clone();
        let backend = self
            .inner
            .backend
            .get_or_try_init(|| async move {
                let backend = tokio::task::spawn_blocking(move || Backend::open(&config))
                    .await
                    .map_err(|e| KvError::Internal(format!("open task failed: {e}")))??;
                Ok::<_, KvError>(Arc::new(backend))
            })
            .await?
            .clone();

        if !self.inner.cleanup_autostarted.swap(true, Ordering::SeqCst) {
            self.start_cleanup_task(self.inner.config.cleanup_interval);
        }

        Ok(backend)
    }

    /// Runs one backend transaction on the blocking thread pool.
    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Backend) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = self.ensure_ready().await?;
        tokio::task::spawn_blocking(move || op(&backend))
            .await
            .map_err(|e| KvError::Internal(format!("blocking task failed: {e}")))?
    }

    fn emit(&self, event: Event) {
        let callbacks = self.inner.subscribers.lock().unwrap().snapshot(event.kind());
        events::dispatch(&callbacks, &event);
    }

    // ==================== Single-entry operations ====================

    /// Stores a value under a key, with an optional TTL.
    ///
    /// Writes are upserts. `created_at` of an existing record is preserved;
    /// `updated_at` is always refreshed. Emits [`Event::Set`] on success and
    /// returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::WriteFailed`] if the backend transaction fails.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<Value> {
        let owned = key.to_string();
        let entry = self
            .run_blocking(move |backend| backend.upsert(&owned, value, ttl))
            .await?;
        self.emit(Event::Set {
            key: entry.key.clone(),
            value: entry.value.clone(),
            ttl_ms: ttl.map(|t| t.as_millis() as u64),
        });
        Ok(entry.value)
    }

    /// Reads the value for a key.
    ///
    /// Returns `Ok(None)` if the key is absent. A stale entry is lazily
    /// deleted, emits [`Event::Expired`], and also yields `Ok(None)`; callers
    /// cannot distinguish absence from expiry.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.get_opts(key, GetOptions::default()).await
    }

    /// Reads the value for a key with explicit options.
    ///
    /// With `skip_expiry_check` set, the raw stored value is returned even
    /// when stale and no lazy delete happens.
    pub async fn get_opts(&self, key: &str, options: GetOptions) -> Result<Option<Value>> {
        let owned = key.to_string();
        let entry = self
            .run_blocking(move |backend| backend.fetch(&owned))
            .await?;

        let entry = match entry {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if options.skip_expiry_check {
            return Ok(Some(entry.value));
        }

        if entry.is_expired_at(now_ms()) {
            // Lazy expiry: purge the stale record. The staleness check is
            // redone inside the write transaction, so a fresh value written
            // since the read survives and a record a concurrent sweep
            // already purged is not reported expired twice.
            let owned = key.to_string();
            let removed = self
                .run_blocking(move |backend| backend.remove_if_stale(&owned, now_ms()))
                .await?;
            if removed {
                self.emit(Event::Expired {
                    key: key.to_string(),
                });
            }
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    /// Removes a key unconditionally.
    ///
    /// Succeeds (returning `true`) even if the key did not exist. Emits
    /// [`Event::Delete`].
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let owned = key.to_string();
        self.run_blocking(move |backend| backend.remove(&owned))
            .await?;
        self.emit(Event::Delete {
            key: key.to_string(),
        });
        Ok(true)
    }

    /// Returns `true` iff [`get`](Self::get) would return a live value.
    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Re-applies a TTL to an existing live value without changing its
    /// payload. Only `expiry` and `updated_at` change.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`] if the key is absent or already
    /// stale; touch never resurrects an expired entry.
    pub async fn touch(&self, key: &str, ttl: Duration) -> Result<Value> {
        let owned = key.to_string();
        let entry = self
            .run_blocking(move |backend| backend.touch(&owned, ttl))
            .await?;
        Ok(entry.value)
    }

    // ==================== Batch operations ====================

    /// Applies a batch of writes inside one backend transaction; either all
    /// succeed or none do.
    ///
    /// Batch writes emit no events, neither per item nor in aggregate, to
    /// avoid event storms on bulk loads.
    pub async fn set_many(&self, items: Vec<(String, Value, Option<Duration>)>) -> Result<()> {
        self.run_blocking(move |backend| backend.upsert_all(items))
            .await
    }

    /// Reads a batch of keys, applying the same lazy-expiry semantics as
    /// [`get`](Self::get) to every key. Absent or stale keys map to `None`.
    pub async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Option<Value>>> {
        let mut results = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.get(key).await?;
            results.insert((*key).to_string(), value);
        }
        Ok(results)
    }

    /// Removes a batch of keys in one transaction. Missing keys are not an
    /// error. Returns how many records were removed. Emits no events.
    pub async fn delete_many(&self, keys: &[&str]) -> Result<u64> {
        let owned: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        self.run_blocking(move |backend| backend.remove_all(&owned))
            .await
    }

    // ==================== Enumeration & introspection ====================

    /// Lists all stored keys.
    ///
    /// With the default options, stale keys are filtered out using the same
    /// liveness predicate as `get` — but enumeration is strictly read-only
    /// and never triggers lazy deletes.
    pub async fn keys(&self, options: KeysOptions) -> Result<Vec<String>> {
        let entries = self.run_blocking(|backend| backend.scan()).await?;
        if options.include_expired {
            return Ok(entries.into_iter().map(|e| e.key).collect());
        }
        let now = now_ms();
        Ok(entries
            .into_iter()
            .filter(|e| e.is_live_at(now))
            .map(|e| e.key)
            .collect())
    }

    /// Returns all `(key, value)` pairs live at call time.
    ///
    /// `now` is computed once for the whole scan, so an entry cannot slip
    /// from live to stale halfway through the returned snapshot.
    pub async fn entries(&self) -> Result<Vec<(String, Value)>> {
        let entries = self.run_blocking(|backend| backend.scan()).await?;
        let now = now_ms();
        Ok(entries
            .into_iter()
            .filter(|e| e.is_live_at(now))
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// Counts the live keys.
    pub async fn size(&self) -> Result<u64> {
        let entries = self.run_blocking(|backend| backend.scan()).await?;
        let now = now_ms();
        Ok(entries.iter().filter(|e| e.is_live_at(now)).count() as u64)
    }

    /// Computes aggregate counters in one full scan. Diagnostic only: never
    /// purges or mutates anything.
    pub async fn stats(&self) -> Result<StoreStats> {
        let entries = self.run_blocking(|backend| backend.scan()).await?;
        let now = now_ms();

        let mut stats = StoreStats::default();
        for entry in &entries {
            stats.total_entries += 1;
            if entry.is_live_at(now) {
                stats.live_entries += 1;
            } else {
                stats.expired_entries += 1;
            }
            if entry.expiry.is_some() {
                stats.with_ttl += 1;
            } else {
                stats.without_ttl += 1;
            }
            stats.oldest_created_at = Some(match stats.oldest_created_at {
                Some(oldest) => oldest.min(entry.created_at),
                None => entry.created_at,
            });
            stats.newest_created_at = Some(match stats.newest_created_at {
                Some(newest) => newest.max(entry.created_at),
                None => entry.created_at,
            });
        }
        Ok(stats)
    }

    // ==================== Expiration & maintenance ====================

    /// Purges every stale entry in one read-write transaction.
    ///
    /// Entries without a TTL are never touched. Partial failure aborts the
    /// whole sweep with [`KvError::Cleanup`] and commits nothing. Emits one
    /// [`Event::Expired`] per purged key, plus one [`Event::Cleanup`] when
    /// at least one entry was removed; emits nothing for an empty sweep.
    ///
    /// Returns the number of purged entries.
    pub async fn cleanup(&self) -> Result<u64> {
        let purged = self
            .run_blocking(|backend| backend.sweep(now_ms()))
            .await?;
        let count = purged.len() as u64;
        for key in purged {
            self.emit(Event::Expired { key });
        }
        if count > 0 {
            self.emit(Event::Cleanup {
                deleted_count: count,
            });
        }
        Ok(count)
    }

    /// Wipes every entry in the namespace and emits one [`Event::Clear`].
    pub async fn clear(&self) -> Result<bool> {
        self.run_blocking(|backend| backend.wipe()).await?;
        self.emit(Event::Clear);
        Ok(true)
    }

    /// Starts the periodic cleanup task, replacing any task already running.
    ///
    /// The first successful backend open starts this automatically with the
    /// configured interval; call it directly to restart with a different
    /// one. A failing sweep is logged and never stops the task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start_cleanup_task(&self, interval: Duration) {
        let task = CleanupTask::start(Arc::downgrade(&self.inner), interval);
        *self.inner.cleanup.lock().unwrap() = Some(task);
    }

    /// Stops the periodic cleanup task if one is running.
    pub fn stop_cleanup_task(&self) {
        if let Some(task) = self.inner.cleanup.lock().unwrap().take() {
            task.stop();
        }
    }

    // ==================== Event notification ====================

    /// Registers a callback for an event kind and returns its handle.
    ///
    /// Callbacks run synchronously in registration order; a panicking
    /// callback is isolated and logged, never failing the triggering
    /// operation or the remaining callbacks.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.subscribers.lock().unwrap().on(kind, callback)
    }

    /// Removes a callback registered with [`on`](Self::on). Removing an
    /// unknown handle is a no-op.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        self.inner.subscribers.lock().unwrap().off(kind, id);
    }

    // ==================== Teardown ====================

    /// Tears the store down: stops the cleanup task, discards all
    /// subscriptions and rejects further operations with [`KvError::Closed`].
    ///
    /// The backend file lock is released once the last clone is dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stop_cleanup_task();
        self.inner.subscribers.lock().unwrap().clear();
        debug!(namespace = %self.inner.config.namespace, "store closed");
    }
}
