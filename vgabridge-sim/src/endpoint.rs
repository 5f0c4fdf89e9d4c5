//! Simulated bulk OUT endpoint.
//!
//! Completes each transfer after its wire time at the configured link
//! speed plus a fixed latency, on a Tokio timer. Faults can be injected
//! by count: a stall every Nth data transfer, or a fatal error on every
//! data transfer past a threshold (a device that went away).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use vgabridge_core::{BulkTransport, Completion, SpeedClass, Transfer, TransferId, TransportError};

/// Endpoint behaviour.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub speed: SpeedClass,
    pub max_packet_size: usize,
    /// Added to every transfer's wire time.
    pub latency: Duration,
    /// Stall every Nth data transfer (0 = never).
    pub stall_every: u64,
    /// Data transfers past this count fail fatally (0 = never).
    pub fail_after: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            speed: SpeedClass::Super,
            max_packet_size: 1024,
            latency: Duration::from_micros(125),
            stall_every: 0,
            fail_after: 0,
        }
    }
}

/// What the endpoint has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub data_transfers: u64,
    pub zero_length_transfers: u64,
    pub bytes: u64,
    pub stalls_injected: u64,
    pub stalls_cleared: u64,
    pub failures_injected: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    data_transfers: AtomicU64,
    zero_length_transfers: AtomicU64,
    bytes: AtomicU64,
    stalls_injected: AtomicU64,
    stalls_cleared: AtomicU64,
    failures_injected: AtomicU64,
    cancelled: AtomicU64,
}

type Pending = Arc<Mutex<HashMap<TransferId, Completion>>>;

// ── SimulatedEndpoint ────────────────────────────────────────────

pub struct SimulatedEndpoint {
    settings: EndpointSettings,
    pending: Pending,
    counters: Counters,
}

impl SimulatedEndpoint {
    pub fn new(settings: EndpointSettings) -> Self {
        Self {
            settings,
            pending: Arc::new(Mutex::new(HashMap::new())),
            counters: Counters::default(),
        }
    }

    /// Transfers submitted but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> EndpointStats {
        let c = &self.counters;
        let get = |a: &AtomicU64| a.load(Ordering::Relaxed);
        EndpointStats {
            data_transfers: get(&c.data_transfers),
            zero_length_transfers: get(&c.zero_length_transfers),
            bytes: get(&c.bytes),
            stalls_injected: get(&c.stalls_injected),
            stalls_cleared: get(&c.stalls_cleared),
            failures_injected: get(&c.failures_injected),
            cancelled: get(&c.cancelled),
        }
    }

    /// Time `len` bytes occupy the wire, plus the fixed latency.
    pub fn transfer_time(&self, len: usize) -> Duration {
        let rate = self.settings.speed.max_byte_rate().max(1);
        let wire_ns = len as u128 * 1_000_000_000 / rate as u128;
        self.settings.latency + Duration::from_nanos(wire_ns as u64)
    }

    /// Decide how the `n`th data transfer (1-based) completes.
    fn outcome(&self, n: u64) -> Result<(), TransportError> {
        let s = &self.settings;
        if s.fail_after > 0 && n > s.fail_after {
            self.counters.failures_injected.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Fatal("device disconnected".into()));
        }
        if s.stall_every > 0 && n % s.stall_every == 0 {
            self.counters.stalls_injected.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Stall);
        }
        Ok(())
    }
}

#[async_trait]
impl BulkTransport for SimulatedEndpoint {
    fn max_packet_size(&self) -> usize {
        self.settings.max_packet_size
    }

    async fn submit(&self, transfer: Transfer, done: Completion) -> Result<(), TransportError> {
        let len = transfer.payload.len();
        let status = if transfer.is_zero_length() {
            self.counters.zero_length_transfers.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            let n = self.counters.data_transfers.fetch_add(1, Ordering::Relaxed) + 1;
            self.counters.bytes.fetch_add(len as u64, Ordering::Relaxed);
            self.outcome(n)
        };

        let id = transfer.id;
        let delay = self.transfer_time(len);
        trace!("endpoint: {id} {len} bytes, completes in {delay:?}");
        self.pending.lock().insert(id, done);

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let done = pending.lock().remove(&id);
            if let Some(done) = done {
                done(status);
            }
        });
        Ok(())
    }

    fn cancel(&self, id: TransferId) {
        let done = self.pending.lock().remove(&id);
        if let Some(done) = done {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("endpoint: cancelled {id}");
            done(Err(TransportError::Cancelled));
        }
    }

    async fn clear_stall(&self) -> Result<(), TransportError> {
        self.counters.stalls_cleared.fetch_add(1, Ordering::Relaxed);
        debug!("endpoint: halt cleared");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::oneshot;
    use vgabridge_core::TransferStatus;

    fn completion() -> (Completion, oneshot::Receiver<TransferStatus>) {
        let (tx, rx) = oneshot::channel();
        let done: Completion = Box::new(move |status| {
            let _ = tx.send(status);
        });
        (done, rx)
    }

    fn data(id: u64, len: usize) -> Transfer {
        Transfer::data(TransferId(id), Bytes::from(vec![0u8; len]), 1024)
    }

    #[test]
    fn wire_time_scales_with_speed() {
        let ep = SimulatedEndpoint::new(EndpointSettings {
            speed: SpeedClass::High,
            latency: Duration::ZERO,
            ..EndpointSettings::default()
        });
        // 60 MB/s → 600 kB take 10 ms.
        assert_eq!(ep.transfer_time(600_000), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn transfer_completes() {
        let ep = SimulatedEndpoint::new(EndpointSettings::default());
        let (done, rx) = completion();
        tokio_test::assert_ok!(ep.submit(data(1, 4096), done).await);
        tokio_test::assert_ok!(rx.await.unwrap());
        let stats = ep.stats();
        assert_eq!(stats.data_transfers, 1);
        assert_eq!(stats.bytes, 4096);
        assert_eq!(ep.pending(), 0);
    }

    #[tokio::test]
    async fn cancel_reports_cancelled() {
        let ep = SimulatedEndpoint::new(EndpointSettings {
            latency: Duration::from_secs(60),
            ..EndpointSettings::default()
        });
        let (done, rx) = completion();
        ep.submit(data(1, 64), done).await.unwrap();
        assert_eq!(ep.pending(), 1);
        ep.cancel(TransferId(1));
        ep.cancel(TransferId(1));
        assert_eq!(rx.await.unwrap(), Err(TransportError::Cancelled));
        assert_eq!(ep.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn injected_faults() {
        let ep = SimulatedEndpoint::new(EndpointSettings {
            stall_every: 2,
            fail_after: 3,
            latency: Duration::ZERO,
            ..EndpointSettings::default()
        });
        let mut results = Vec::new();
        for id in 1..=4 {
            let (done, rx) = completion();
            ep.submit(data(id, 64), done).await.unwrap();
            results.push(rx.await.unwrap());
        }
        assert_eq!(results[0], Ok(()));
        assert_eq!(results[1], Err(TransportError::Stall));
        assert_eq!(results[2], Ok(()));
        assert!(matches!(results[3], Err(TransportError::Fatal(_))));

        // Zero-length transfers are never faulted or counted as data.
        let (done, rx) = completion();
        ep.submit(Transfer::zero_length(TransferId(9)), done).await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(ep.stats().zero_length_transfers, 1);
        assert_eq!(ep.stats().data_transfers, 4);
    }
}
