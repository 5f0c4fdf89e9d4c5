//! The frame stream engine.
//!
//! ```text
//!  display refresh                     transport completions
//!        │                                      │
//!  submit_frame()                          on_complete()
//!        │ pack into staging                    │ O(1): release, credit
//!        ▼                                      ▼
//!   ┌─────────┐  stage   ┌────────┐  send  ┌──────────┐
//!   │  Free   │ ───────► │ Queued │ ─────► │ InFlight │
//!   └─────────┘          └────────┘        └──────────┘
//!        ▲                                      │
//!        └──────────────────────────────────────┘
//!                          worker (tokio task)
//!                 Credit / Stalled / Failed events
//! ```
//!
//! The worker sends one buffer per credit. It is primed with
//! [`MIN_PIPELINE_DEPTH`] credits and every successful completion returns
//! one, so the pipeline stays full: when the producer falls behind the
//! worker resends the newest frame it has.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::anchor::Anchor;
use super::config::{BUFFER_ALIGN, StreamConfig, StreamOptions};
use super::pool::{BufferId, BufferPool, MIN_PIPELINE_DEPTH, POOL_SIZE, PoolSnapshot, zeroed};
use super::state::StreamPhase;
use super::stats::{StreamCounters, StreamStats};
use crate::error::{BridgeError, TransportError};
use crate::mode::ModePlan;
use crate::pack::{pack_frame, validate_frame};
use crate::transport::{BulkTransport, Completion, Transfer, TransferId, TransferStatus, needs_zero_length_followup};

// ── Public types ─────────────────────────────────────────────────

/// What happened to a frame handed to [`StreamEngine::submit_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Packed and queued for sending.
    Queued,
    /// Not sent: no free buffer, stream down, or another producer busy.
    Dropped,
}

/// Summary of a [`StreamEngine::disable`] call.
#[derive(Debug, Clone, Default)]
pub struct DisableReport {
    /// Buffers forced back to Free from Queued or InFlight.
    pub drained: usize,
    /// Transfers still outstanding after the timeout and cancelled.
    pub killed: usize,
    /// Transfers that did not even report back after cancellation.
    pub forgotten: usize,
    /// Pool state just before release.
    pub pool: PoolSnapshot,
    /// Fatal transport error that stopped the stream, if any.
    pub fault: Option<TransportError>,
    pub stats: StreamStats,
}

// ── Internals ────────────────────────────────────────────────────

enum WorkerEvent {
    /// A completion freed one pipeline slot.
    Credit,
    /// A data transfer stalled; `attempt` counts clear-and-resubmit rounds.
    Stalled { buffer: BufferId, attempt: u32 },
    /// A completion reported a fatal error.
    Failed(TransportError),
}

type EventTx = mpsc::UnboundedSender<WorkerEvent>;

/// Producer-owned packing area.
#[derive(Default)]
struct Staging {
    config: Option<StreamConfig>,
    region: Option<BytesMut>,
}

/// State reachable from the producer, the worker and completions.
struct Shared {
    transport: Arc<dyn BulkTransport>,
    options: StreamOptions,
    pool: Mutex<Option<BufferPool>>,
    staging: Mutex<Staging>,
    accepting: AtomicBool,
    anchor: Anchor,
    counters: StreamCounters,
    frame_tx: watch::Sender<u64>,
    fault: Mutex<Option<TransportError>>,
    next_transfer: AtomicU64,
    epoch: AtomicU64,
}

struct Control {
    phase: StreamPhase,
    config: Option<StreamConfig>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

// ── StreamEngine ─────────────────────────────────────────────────

/// Owns the buffer pool and the worker streaming it to a [`BulkTransport`].
///
/// # Usage
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use vgabridge_core::stream::StreamEngine;
/// # use vgabridge_core::transport::BulkTransport;
/// # async fn demo(transport: Arc<dyn BulkTransport>, frame: &[u8]) -> Result<(), vgabridge_core::BridgeError> {
/// let engine = StreamEngine::new(transport);
/// engine.configure(2, 640 * 480)?;
/// engine.enable().await?;
/// engine.submit_frame(frame, 640, 480, 640 * 4)?;
/// let report = engine.disable().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamEngine {
    shared: Arc<Shared>,
    control: Mutex<Control>,
    lifecycle: tokio::sync::Mutex<Option<Worker>>,
}

impl StreamEngine {
    pub fn new(transport: Arc<dyn BulkTransport>) -> Self {
        Self::with_options(transport, StreamOptions::default())
    }

    pub fn with_options(transport: Arc<dyn BulkTransport>, options: StreamOptions) -> Self {
        let (frame_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                transport,
                options,
                pool: Mutex::new(None),
                staging: Mutex::new(Staging::default()),
                accepting: AtomicBool::new(false),
                anchor: Anchor::new(),
                counters: StreamCounters::default(),
                frame_tx,
                fault: Mutex::new(None),
                next_transfer: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
            control: Mutex::new(Control {
                phase: StreamPhase::Disabled,
                config: None,
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    // ── Configuration ────────────────────────────────────────────

    /// Set pixel depth and frame size for the next `enable`.
    pub fn configure(&self, bytes_per_pixel: u8, pixel_count: usize) -> Result<StreamConfig, BridgeError> {
        let mut control = self.control.lock();
        control
            .phase
            .require_disabled("cannot configure while streaming")?;
        let config = StreamConfig::new(bytes_per_pixel, pixel_count)?;
        control.config = Some(config);
        debug!(
            "stream configured: {} bytes/pixel, {} byte buffers",
            config.bytes_per_pixel, config.buffer_size
        );
        Ok(config)
    }

    /// [`configure`](Self::configure) from a mode plan.
    pub fn configure_plan(&self, plan: &ModePlan) -> Result<StreamConfig, BridgeError> {
        self.configure(plan.bytes_per_pixel, plan.pixel_count)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Allocate the pool and start streaming.
    pub async fn enable(&self) -> Result<(), BridgeError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let shared = &self.shared;

        let config = {
            let control = self.control.lock();
            if control.phase.is_enabled() {
                return Err(BridgeError::InvalidState("stream already enabled"));
            }
            control
                .config
                .ok_or(BridgeError::InvalidState("stream not configured"))?
        };

        // Not under the control lock: buffers can be tens of megabytes.
        let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let pool = BufferPool::allocate(POOL_SIZE, config.buffer_size, epoch)?;

        {
            let mut control = self.control.lock();
            if control.config != Some(config) {
                return Err(BridgeError::InvalidState("stream reconfigured during enable"));
            }
            control.phase.enable()?;
            *shared.pool.lock() = Some(pool);
        }

        {
            let mut staging = shared.staging.lock();
            staging.config = Some(config);
            staging.region = None;
        }
        shared.fault.lock().take();

        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..MIN_PIPELINE_DEPTH {
            let _ = tx.send(WorkerEvent::Credit);
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(Arc::clone(shared), tx, rx, cancel.clone(), epoch));
        *lifecycle = Some(Worker { handle, cancel });
        shared.accepting.store(true, Ordering::Release);

        info!(
            "stream enabled: {} x {} byte buffers, {} bytes/pixel",
            POOL_SIZE, config.buffer_size, config.bytes_per_pixel
        );
        Ok(())
    }

    /// Stop streaming and release the pool.
    ///
    /// Safe to call at any time and more than once. When it returns no
    /// worker iteration and no tracked transfer is active.
    pub async fn disable(&self) -> DisableReport {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(worker) = lifecycle.take() else {
            return DisableReport::default();
        };
        let shared = &self.shared;
        let options = &shared.options;
        let mut report = DisableReport::default();

        shared.accepting.store(false, Ordering::Release);
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!("stream worker ended abnormally: {e}");
        }

        if !shared.anchor.wait_empty(options.disable_timeout).await {
            report.killed = shared.anchor.kill_all(shared.transport.as_ref());
            warn!(
                "{} transfers outstanding after {:?}, cancelling",
                report.killed, options.disable_timeout
            );
            if !shared.anchor.wait_empty(options.kill_grace).await {
                report.forgotten = shared.anchor.forget_all();
            }
        }

        if let Some(mut pool) = shared.pool.lock().take() {
            report.drained = pool.drain();
            report.pool = pool.snapshot();
        }
        *shared.staging.lock() = Staging::default();
        report.fault = shared.fault.lock().clone();
        report.stats = shared.counters.snapshot();
        self.control.lock().phase.disable();

        info!(
            "stream disabled: drained {}, killed {}, forgotten {}",
            report.drained, report.killed, report.forgotten
        );
        report
    }

    // ── Producer ─────────────────────────────────────────────────

    /// Pack `src` and queue it for sending. Never blocks on the transport.
    ///
    /// `src` holds `height` rows of XRGB8888 pixels, `pitch` bytes apart.
    pub fn submit_frame(
        &self,
        src: &[u8],
        width: usize,
        height: usize,
        pitch: usize,
    ) -> Result<FrameOutcome, BridgeError> {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::Acquire) {
            return Ok(shared.dropped("stream not accepting"));
        }
        let Some(mut staging) = shared.staging.try_lock() else {
            return Ok(shared.dropped("producer busy"));
        };
        let Some(config) = staging.config else {
            return Ok(shared.dropped("stream not configured"));
        };
        let format = config.format();
        let packed_len = validate_frame(format, src.len(), width, height, pitch, config.buffer_size)?;

        if !shared.pool.lock().as_ref().is_some_and(BufferPool::has_free) {
            return Ok(shared.dropped("no free buffer"));
        }

        let mut region = match staging.region.take() {
            Some(region) if region.len() == config.buffer_size => region,
            _ => match staging_region(config.buffer_size) {
                Ok(region) => region,
                Err(e) => {
                    warn!("staging allocation failed: {e}");
                    StreamCounters::bump(&shared.counters.frames_dropped);
                    return Err(e);
                }
            },
        };
        // A reused region still holds an older frame. Zero from the last
        // partially written 64-bit word to the end.
        region[packed_len / BUFFER_ALIGN * BUFFER_ALIGN..].fill(0);
        if let Err(e) = pack_frame(format, src, width, height, pitch, &mut region) {
            staging.region = Some(region);
            return Err(e);
        }

        let staged = match shared.pool.lock().as_mut() {
            Some(pool) => pool.stage(region.freeze()),
            None => return Ok(shared.dropped("stream stopped while packing")),
        };
        match staged {
            Ok(retired) => {
                staging.region = reusable(retired, config.buffer_size);
                StreamCounters::bump(&shared.counters.frames_queued);
                Ok(FrameOutcome::Queued)
            }
            Err(packed) => {
                staging.region = reusable(packed, config.buffer_size);
                Ok(shared.dropped("no free buffer"))
            }
        }
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn phase(&self) -> StreamPhase {
        self.control.lock().phase.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.control.lock().phase.is_enabled()
    }

    pub fn config(&self) -> Option<StreamConfig> {
        self.control.lock().config
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    /// List lengths, `None` while disabled.
    pub fn pool_snapshot(&self) -> Option<PoolSnapshot> {
        self.shared.pool.lock().as_ref().map(BufferPool::snapshot)
    }

    /// Run the pool's consistency check; a disabled engine is consistent.
    pub fn verify_pool(&self) -> Result<(), String> {
        match self.shared.pool.lock().as_ref() {
            Some(pool) => pool.check_invariants(),
            None => Ok(()),
        }
    }

    /// Transfers currently owned by the transport.
    pub fn outstanding(&self) -> usize {
        self.shared.anchor.len()
    }

    /// The fatal error that stopped streaming, if any.
    pub fn fault(&self) -> Option<TransportError> {
        self.shared.fault.lock().clone()
    }

    /// Running count of elapsed frame periods (one per data completion).
    pub fn frame_periods(&self) -> watch::Receiver<u64> {
        self.shared.frame_tx.subscribe()
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);
        if let Some(worker) = self.lifecycle.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

fn staging_region(size: usize) -> Result<BytesMut, BridgeError> {
    zeroed(size)?
        .try_into_mut()
        .map_err(|_| BridgeError::OutOfMemory { requested: size })
}

/// Keep `storage` as the next staging region if nobody else holds it.
fn reusable(storage: Bytes, size: usize) -> Option<BytesMut> {
    storage.try_into_mut().ok().filter(|region| region.len() == size)
}

// ── Worker ───────────────────────────────────────────────────────

async fn run_worker(
    shared: Arc<Shared>,
    tx: EventTx,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    cancel: CancellationToken,
    epoch: u64,
) {
    debug!("stream worker started (epoch {epoch})");
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let result = match event {
            WorkerEvent::Credit => shared.send_next(&tx, epoch).await,
            WorkerEvent::Stalled { buffer, attempt } => {
                shared.retry_stalled(&tx, epoch, buffer, attempt).await
            }
            WorkerEvent::Failed(err) => Err(err),
        };
        if let Err(err) = result {
            shared.set_fault(err);
            break;
        }
    }
    debug!("stream worker stopped (epoch {epoch})");
}

impl Shared {
    fn dropped(&self, reason: &'static str) -> FrameOutcome {
        StreamCounters::bump(&self.counters.frames_dropped);
        debug!("frame dropped: {reason}");
        FrameOutcome::Dropped
    }

    fn transfer_id(&self) -> TransferId {
        TransferId(self.next_transfer.fetch_add(1, Ordering::Relaxed))
    }

    /// Drop one in-flight reference on `buffer` if its pool is current.
    fn release(&self, epoch: u64, buffer: BufferId) {
        let mut pool = self.pool.lock();
        if let Some(pool) = pool.as_mut().filter(|p| p.epoch() == epoch) {
            pool.release(buffer);
        }
    }

    fn set_fault(&self, err: TransportError) {
        error!("stream fault, stopping: {err}");
        self.accepting.store(false, Ordering::Release);
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    /// One credit: pick a buffer and put it on the wire.
    async fn send_next(self: &Arc<Self>, tx: &EventTx, epoch: u64) -> Result<(), TransportError> {
        let selected = {
            let mut pool = self.pool.lock();
            match pool.as_mut().filter(|p| p.epoch() == epoch) {
                Some(pool) => pool.next_to_send(),
                None => None,
            }
        };
        let Some(selected) = selected else {
            return Ok(());
        };
        if selected.selection.is_repeat() {
            StreamCounters::bump(&self.counters.repeats);
        }
        debug!("sending {} ({:?})", selected.id, selected.selection);
        self.transmit(tx, epoch, selected.id, selected.data, 0).await
    }

    /// Clear a stall and resend the buffer that hit it.
    async fn retry_stalled(
        self: &Arc<Self>,
        tx: &EventTx,
        epoch: u64,
        buffer: BufferId,
        attempt: u32,
    ) -> Result<(), TransportError> {
        if attempt > self.options.stall_retries {
            self.release(epoch, buffer);
            return Err(TransportError::Stall);
        }
        StreamCounters::bump(&self.counters.stall_retries);
        warn!("endpoint stalled sending {buffer}, clearing (attempt {attempt})");

        if let Err(err) = self.transport.clear_stall().await {
            self.release(epoch, buffer);
            return Err(err);
        }
        let data = {
            let pool = self.pool.lock();
            pool.as_ref()
                .filter(|p| p.epoch() == epoch)
                .and_then(|p| p.buffer(buffer))
                .map(|b| b.data.clone())
        };
        match data {
            Some(data) => self.transmit(tx, epoch, buffer, data, attempt).await,
            None => Ok(()),
        }
    }

    /// Submit `data` for `buffer`, plus a zero-length follow-up when the
    /// payload ends on a short packet.
    async fn transmit(
        self: &Arc<Self>,
        tx: &EventTx,
        epoch: u64,
        buffer: BufferId,
        data: Bytes,
        attempt: u32,
    ) -> Result<(), TransportError> {
        let max_packet = self.transport.max_packet_size();
        let len = data.len();

        let id = self.transfer_id();
        let transfer = Transfer::data(id, data, max_packet);
        self.anchor.add(id);
        let submitted = self
            .submit_with_retry(transfer, || self.data_completion(tx.clone(), epoch, buffer, id, attempt))
            .await;
        if let Err(err) = submitted {
            self.anchor.remove(id);
            self.release(epoch, buffer);
            return Err(err);
        }
        StreamCounters::bump(&self.counters.transfers_submitted);

        if needs_zero_length_followup(len, max_packet) {
            let zlp = self.transfer_id();
            self.anchor.add(zlp);
            let submitted = self
                .submit_with_retry(Transfer::zero_length(zlp), || {
                    let shared = Arc::clone(self);
                    let done: Completion = Box::new(move |_status| {
                        shared.anchor.remove(zlp);
                    });
                    done
                })
                .await;
            if let Err(err) = submitted {
                self.anchor.remove(zlp);
                return Err(err);
            }
            StreamCounters::bump(&self.counters.zero_length_sent);
        }
        Ok(())
    }

    /// Submit, retrying transient failures with a short backoff.
    ///
    /// A rejected submission drops its completion uncalled, so a fresh one
    /// is built for every attempt.
    async fn submit_with_retry<F>(&self, transfer: Transfer, make_done: F) -> Result<(), TransportError>
    where
        F: Fn() -> Completion,
    {
        let mut attempt = 1;
        loop {
            match self.transport.submit(transfer.clone(), make_done()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.options.submit_attempts => {
                    StreamCounters::bump(&self.counters.transient_retries);
                    debug!("submit {} busy ({err}), retry {attempt}", transfer.id);
                    attempt += 1;
                    tokio::time::sleep(self.options.submit_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn data_completion(
        self: &Arc<Self>,
        tx: EventTx,
        epoch: u64,
        buffer: BufferId,
        id: TransferId,
        attempt: u32,
    ) -> Completion {
        let shared = Arc::clone(self);
        Box::new(move |status| shared.on_complete(&tx, epoch, buffer, id, attempt, status))
    }

    /// Completion path: O(1) bookkeeping and a message to the worker.
    fn on_complete(
        &self,
        tx: &EventTx,
        epoch: u64,
        buffer: BufferId,
        id: TransferId,
        attempt: u32,
        status: TransferStatus,
    ) {
        if !self.anchor.remove(id) {
            debug!("late completion for forgotten transfer {id}");
        }
        match status {
            Ok(()) => {
                self.release(epoch, buffer);
                StreamCounters::bump(&self.counters.transfers_completed);
                let _ = tx.send(WorkerEvent::Credit);
            }
            Err(TransportError::Stall) => {
                let _ = tx.send(WorkerEvent::Stalled {
                    buffer,
                    attempt: attempt + 1,
                });
            }
            Err(TransportError::Cancelled) => {
                self.release(epoch, buffer);
            }
            Err(err) => {
                self.release(epoch, buffer);
                let _ = tx.send(WorkerEvent::Failed(err));
            }
        }
        self.frame_tx.send_modify(|n| *n += 1);
    }
}

// ── Tests ────────────────────────────────────────────────────────
