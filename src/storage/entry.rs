//! Entry records and store statistics.
//!
//! An [`Entry`] is the unit of storage: key, opaque JSON payload, optional
//! absolute expiry and write timestamps. Entries are JSON-encoded into the
//! backend, so timestamps use milliseconds since the Unix epoch rather than
//! a process-local monotonic clock; persisted expirations must survive a
//! restart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A stored key-value record with expiration metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Primary lookup key, unique within a namespace.
    pub key: String,
    /// The payload. Opaque to the store.
    pub value: Value,
    /// Absolute expiry in milliseconds since epoch. `None` means the entry
    /// never expires.
    pub expiry: Option<u64>,
    /// Set at first write and preserved on overwrite.
    pub created_at: u64,
    /// Set on every write, including overwrites.
    pub updated_at: u64,
}

impl Entry {
    /// Creates a fresh entry, stamping both timestamps with the current time.
    pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>) -> Self {
        let now = now_ms();
        Self {
            key: key.into(),
            value,
            expiry: ttl.map(|t| now + t.as_millis() as u64),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the entry is live at `now`: no expiry, or the
    /// expiry timestamp is still in the future.
    #[inline]
    pub fn is_live_at(&self, now: u64) -> bool {
        self.expiry.map_or(true, |expiry| expiry > now)
    }

    /// Returns `true` if the entry is stale at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        !self.is_live_at(now)
    }

    /// Remaining TTL at `now`, or `None` for never-expiring entries.
    pub fn ttl_remaining_at(&self, now: u64) -> Option<Duration> {
        self.expiry
            .map(|expiry| Duration::from_millis(expiry.saturating_sub(now)))
    }
}

/// Aggregate counters over one full scan of the namespace.
///
/// Diagnostic only: computing stats never purges or mutates anything, so
/// `expired_entries` counts stale records that the next sweep will remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// All physical records, live and stale.
    pub total_entries: u64,
    /// Records that are live at scan time.
    pub live_entries: u64,
    /// Stale records not yet purged.
    pub expired_entries: u64,
    /// Records carrying a TTL (live or stale).
    pub with_ttl: u64,
    /// Records that never expire.
    pub without_ttl: u64,
    /// Earliest `created_at` across all records, if any exist.
    pub oldest_created_at: Option<u64>,
    /// Latest `created_at` across all records, if any exist.
    pub newest_created_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = Entry::new("config", json!({"theme": "dark"}), None);
        assert!(entry.is_live_at(u64::MAX));
        assert_eq!(entry.ttl_remaining_at(now_ms()), None);
    }

    #[test]
    fn test_entry_liveness_boundary() {
        let mut entry = Entry::new("session", json!("token"), Some(Duration::from_millis(100)));
        let expiry = entry.expiry.unwrap();

        assert!(entry.is_live_at(expiry - 1));
        // expiry <= now means stale
        assert!(entry.is_expired_at(expiry));
        assert!(entry.is_expired_at(expiry + 1));

        entry.expiry = None;
        assert!(entry.is_live_at(expiry + 1));
    }

    #[test]
    fn test_entry_round_trips_through_json() {
        let entry = Entry::new("k", json!([1, 2, 3]), Some(Duration::from_secs(60)));
        let encoded = serde_json::to_vec(&entry).unwrap();
        let decoded: Entry = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn test_ttl_remaining_saturates_at_zero() {
        let entry = Entry {
            key: "k".to_string(),
            value: json!(null),
            expiry: Some(1_000),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(
            entry.ttl_remaining_at(5_000),
            Some(Duration::from_millis(0))
        );
    }
}
