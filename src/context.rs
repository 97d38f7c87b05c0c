// =============================================================================
// TrackerContext — shared snapshot publication and shutdown signalling
// =============================================================================
//
// The one piece of state the lifecycle manager and the ingest loop share.
// The tracked-symbol snapshot is replaced wholesale (a fresh Arc with a
// bumped version) so the ingest loop can never observe a half-updated set;
// the shutdown flag latches and wakes any loop parked on `cancelled()`.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::info;

use crate::types::{Symbol, TrackedSnapshot};

pub struct TrackerContext {
    snapshot: RwLock<Arc<TrackedSnapshot>>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl TrackerContext {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(TrackedSnapshot::empty()),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    // ── Snapshot publication ────────────────────────────────────────────

    /// Publish a new tracked-symbol snapshot. The symbol set is sorted and
    /// the version bumped past the currently live one; readers holding an
    /// older Arc simply see a stale version on their next comparison.
    pub fn publish(&self, mut symbols: Vec<Symbol>) -> u64 {
        symbols.sort();
        symbols.dedup();

        let mut slot = self.snapshot.write();
        let version = slot.version + 1;
        *slot = Arc::new(TrackedSnapshot { version, symbols });
        info!(version, count = slot.symbols.len(), "published tracked snapshot");
        version
    }

    /// Current live snapshot. Cheap: clones an Arc under a read lock.
    pub fn snapshot(&self) -> Arc<TrackedSnapshot> {
        self.snapshot.read().clone()
    }

    // ── Shutdown signalling ─────────────────────────────────────────────

    /// Latch the shutdown flag and wake every task parked on `cancelled()`.
    pub fn trigger_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered. Safe to call after the
    /// fact — the latched flag short-circuits the wait.
    pub async fn cancelled(&self) {
        while !self.is_shutdown() {
            let notified = self.shutdown_notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for TrackerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_bumps_version_and_sorts() {
        let ctx = TrackerContext::new();
        assert_eq!(ctx.snapshot().version, 0);

        let v = ctx.publish(vec![
            Symbol::from_canonical("ETHUSDT"),
            Symbol::from_canonical("BTCUSDT"),
            Symbol::from_canonical("ETHUSDT"),
        ]);
        assert_eq!(v, 1);

        let snap = ctx.snapshot();
        assert_eq!(snap.version, 1);
        assert_eq!(
            snap.symbols,
            vec![
                Symbol::from_canonical("BTCUSDT"),
                Symbol::from_canonical("ETHUSDT"),
            ]
        );
    }

    #[test]
    fn old_snapshot_is_untouched_by_publish() {
        let ctx = TrackerContext::new();
        ctx.publish(vec![Symbol::from_canonical("BTCUSDT")]);
        let old = ctx.snapshot();

        ctx.publish(vec![]);
        assert_eq!(old.symbols.len(), 1);
        assert_eq!(ctx.snapshot().version, 2);
        assert!(ctx.snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let ctx = Arc::new(TrackerContext::new());

        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        ctx.trigger_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
        assert!(ctx.is_shutdown());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_shut_down() {
        let ctx = TrackerContext::new();
        ctx.trigger_shutdown();
        ctx.cancelled().await;
    }
}
