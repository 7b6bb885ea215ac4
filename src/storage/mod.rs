//! Storage Module
//!
//! This module provides the persistent storage functionality for StashKV:
//! entry records, the transactional backend, the public store surface and
//! the background cleanup task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        KvStore                              │
//! │   lazy connection ─ events ─ lazy expiry ─ batch ops        │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Backend                              │
//! │        ACID transactions over a single database file        │
//! │        one table per namespace, JSON-encoded entries        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │       CleanupTask         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Durable Storage**: Entries survive process restarts
//! - **TTL Support**: Keys can carry an optional time-to-live
//! - **Lazy Expiry**: Stale keys are purged on access
//! - **Active Expiry**: A background sweep purges keys nobody reads
//! - **Namespaces**: Independent tables can share one database file
//!
//! ## Example
//!
//! ```ignore
//! use stashkv::{KvStore, StoreConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let store = KvStore::open(StoreConfig::new("app.redb")).await?;
//!
//! // Basic operations
//! store.set("name", json!("Ariz"), None).await?;
//! let value = store.get("name").await?;
//! assert_eq!(value, Some(json!("Ariz")));
//!
//! // Set with TTL
//! store.set("session", json!("token123"), Some(Duration::from_secs(3600))).await?;
//! ```

pub(crate) mod backend;
pub(crate) mod cleanup;
pub mod entry;
pub mod store;

// Re-export commonly used types
pub use entry::{Entry, StoreStats};
pub use store::{GetOptions, KeysOptions, KvStore, StoreConfig, DEFAULT_CLEANUP_INTERVAL};
