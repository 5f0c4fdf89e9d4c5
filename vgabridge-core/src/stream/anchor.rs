//! Outstanding-transfer tracking.
//!
//! Every submission is anchored before it is handed to the transport and
//! unanchored from its completion. Teardown uses the anchor to wait for
//! the wire to go quiet, to kill whatever is still outstanding, and as a
//! last resort to forget handles whose completions never arrived.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::transport::{BulkTransport, TransferId};

/// Set of transfer ids currently owned by the transport.
#[derive(Debug)]
pub struct Anchor {
    ids: Mutex<HashSet<TransferId>>,
    count_tx: watch::Sender<usize>,
}

impl Default for Anchor {
    fn default() -> Self {
        Self::new()
    }
}

impl Anchor {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            ids: Mutex::new(HashSet::new()),
            count_tx,
        }
    }

    /// Track `id` as outstanding.
    pub fn add(&self, id: TransferId) {
        let mut ids = self.ids.lock();
        ids.insert(id);
        self.count_tx.send_replace(ids.len());
    }

    /// Stop tracking `id`. Returns `false` if it was not tracked
    /// (already forgotten).
    pub fn remove(&self, id: TransferId) -> bool {
        let mut ids = self.ids.lock();
        let removed = ids.remove(&id);
        self.count_tx.send_replace(ids.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until nothing is outstanding. Returns `false` on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let mut rx = self.count_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Ask the transport to kill every outstanding transfer.
    ///
    /// Returns how many cancellations were requested.
    pub fn kill_all(&self, transport: &dyn BulkTransport) -> usize {
        // Snapshot first: cancel may complete synchronously and re-enter
        // `remove`.
        let ids: Vec<TransferId> = self.ids.lock().iter().copied().collect();
        for &id in &ids {
            transport.cancel(id);
        }
        ids.len()
    }

    /// Drop every remaining handle without waiting for it.
    ///
    /// Returns how many were forgotten.
    pub fn forget_all(&self) -> usize {
        let mut ids = self.ids.lock();
        let n = ids.len();
        if n > 0 {
            warn!("forgetting {n} transfers that never completed");
        }
        ids.clear();
        self.count_tx.send_replace(0);
        n
    }
}

// ── Tests ────────────────────────────────────────────────────────
