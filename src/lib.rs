//! # StashKV - A Persistent, Expiring Key-Value Store
//!
//! StashKV is an embedded key-value store with per-entry time-to-live,
//! written in Rust. It stores arbitrary JSON values in a single transactional
//! database file and notifies observers of every mutation through a small,
//! fixed event vocabulary.
//!
//! ## Features
//!
//! - **Durable**: Entries and their expirations survive process restarts
//! - **TTL Support**: Keys can expire, lazily on access or via a background sweep
//! - **Events**: Subscribe to `set`, `delete`, `expired`, `clear` and `cleanup`
//! - **Async API**: Built on Tokio; backend transactions run off the async threads
//! - **Namespaces**: Independent stores can share one database file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               StashKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │ ReadThrough │───>│                 KvStore                      │    │
//! │  │ (typed API) │    │  lazy connection ─ lazy expiry ─ batch ops   │    │
//! │  └─────────────┘    └──────┬───────────────────────────┬───────────┘    │
//! │                            │                           │                │
//! │                            ▼                           ▼                │
//! │  ┌──────────────────────────────────────┐   ┌────────────────────────┐  │
//! │  │               Backend                │   │      Subscribers       │  │
//! │  │  ACID transactions, one table per    │   │  set / delete /        │  │
//! │  │  namespace, JSON-encoded entries     │   │  expired / clear /     │  │
//! │  └──────────────────────────────────────┘   │  cleanup callbacks     │  │
//! │                     ▲                       └────────────────────────┘  │
//! │                     │                                                   │
//! │       ┌─────────────┴─────────────┐                                     │
//! │       │        CleanupTask        │                                     │
//! │       │  (Background Tokio Task)  │                                     │
//! │       └───────────────────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use stashkv::{EventKind, KvStore, StoreConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> stashkv::Result<()> {
//!     // Open (or create) the store; the cleanup task starts automatically
//!     let store = KvStore::open(StoreConfig::new("app.redb")).await?;
//!
//!     // Watch expirations
//!     store.on(EventKind::Expired, |event| {
//!         println!("expired: {event:?}");
//!     });
//!
//!     // Plain write, write with TTL
//!     store.set("config", json!({"theme": "dark"}), None).await?;
//!     store.set("session:1", json!("token123"), Some(Duration::from_secs(3600))).await?;
//!
//!     // Reads never return stale values
//!     let session = store.get("session:1").await?;
//!     assert!(session.is_some());
//!
//!     store.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: The store itself — entries, backend, cleanup task
//! - [`events`]: Event vocabulary and subscription handles
//! - [`cache`]: Typed read-through caching over a store
//! - [`error`]: The [`KvError`] taxonomy
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: A read that finds a stale entry deletes it and reports a miss
//! 2. **Active**: A background task periodically sweeps for stale keys
//!
//! This ensures storage is reclaimed even for keys that are never read again.
//!
//! ### Deduplicated Initialization
//!
//! The backend connection opens lazily on first use. Concurrent first callers
//! share a single pending open; a store never holds two connections to its
//! database file.
//!
//! ### Isolated Observers
//!
//! Event callbacks run synchronously in registration order, but a panicking
//! callback is caught and logged. Observer bugs never fail the store
//! operation that triggered the event.

pub mod cache;
pub mod error;
pub mod events;
pub mod storage;

// Re-export commonly used types for convenience
pub use cache::ReadThrough;
pub use error::{KvError, Result};
pub use events::{Event, EventKind, SubscriptionId};
pub use storage::{
    Entry, GetOptions, KeysOptions, KvStore, StoreConfig, StoreStats, DEFAULT_CLEANUP_INTERVAL,
};

/// Version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
