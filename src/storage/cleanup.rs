//! Background Expiration Sweeping
//!
//! A single tokio task wakes up on a fixed interval and asks the store to
//! purge stale entries. The task holds only a weak handle to the store, so
//! it never keeps a dropped store alive; it exits on the shutdown signal or
//! as soon as the store is gone.
//!
//! A failing sweep is logged and retried on the next tick. The task never
//! stops itself because of errors.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::storage::store::{Inner, KvStore};

/// Handle to the periodic cleanup task.
///
/// Dropping the handle signals shutdown, so a replaced task winds down on
/// its own.
pub(crate) struct CleanupTask {
    shutdown_tx: watch::Sender<bool>,
}

impl CleanupTask {
    /// Spawns the sweep loop. Must be called within a Tokio runtime.
    pub(crate) fn start(store: Weak<Inner>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweep_loop(store, interval, shutdown_rx));
        debug!(
            interval_ms = interval.as_millis() as u64,
            "cleanup task started"
        );
        Self { shutdown_tx }
    }

    /// Signals the loop to exit. Idempotent.
    pub(crate) fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(store: Weak<Inner>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("cleanup task shutting down");
                    return;
                }
                continue;
            }
        }

        // Upgrade per tick: if every store clone is gone, so are we.
        let store = match store.upgrade() {
            Some(inner) => KvStore::from_inner(inner),
            None => return,
        };

        match store.cleanup().await {
            Ok(purged) if purged > 0 => {
                debug!(purged, "sweep purged expired entries");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "sweep failed, retrying on next tick");
            }
        }
    }
}
