//! Stream counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames packed and queued by the producer.
    pub frames_queued: u64,
    /// Frames dropped because no buffer was free or the stream was down.
    pub frames_dropped: u64,
    /// Data transfers handed to the transport (zero-length ones excluded).
    pub transfers_submitted: u64,
    /// Data transfers that completed successfully.
    pub transfers_completed: u64,
    /// Submissions that resent an already-sent frame.
    pub repeats: u64,
    pub zero_length_sent: u64,
    pub stall_retries: u64,
    pub transient_retries: u64,
}

/// Lock-free counters updated from the producer, worker and completions.
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    pub frames_queued: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub transfers_submitted: AtomicU64,
    pub transfers_completed: AtomicU64,
    pub repeats: AtomicU64,
    pub zero_length_sent: AtomicU64,
    pub stall_retries: AtomicU64,
    pub transient_retries: AtomicU64,
}

impl StreamCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStats {
            frames_queued: get(&self.frames_queued),
            frames_dropped: get(&self.frames_dropped),
            transfers_submitted: get(&self.transfers_submitted),
            transfers_completed: get(&self.transfers_completed),
            repeats: get(&self.repeats),
            zero_length_sent: get(&self.zero_length_sent),
            stall_retries: get(&self.stall_retries),
            transient_retries: get(&self.transient_retries),
        }
    }
}
