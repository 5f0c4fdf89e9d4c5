//! End-to-end bridge run.
//!
//! Plans the configured mode, streams synthetic frames through the
//! engine into the simulated endpoint at the configured rate, then tears
//! the stream down and reports what happened.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use vgabridge_core::{
    BridgeError, DisableReport, FrameOutcome, ModePlan, StreamEngine, StreamStats, plan_mode,
};

use crate::config::SimConfig;
use crate::endpoint::{EndpointStats, SimulatedEndpoint};
use crate::framebuffer::SyntheticFramebuffer;

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: ModePlan,
    /// Frames handed to the engine.
    pub frames_offered: u64,
    /// Engine counters after teardown.
    pub stats: StreamStats,
    /// Frame periods signalled by completions.
    pub frame_periods: u64,
    pub disable: DisableReport,
    pub endpoint: EndpointStats,
    pub elapsed: Duration,
}

// ── BridgeRunner ─────────────────────────────────────────────────

pub struct BridgeRunner {
    config: SimConfig,
    running: Arc<AtomicBool>,
}

impl BridgeRunner {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that stops the run when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until the configured duration elapses, the stop handle is
    /// cleared, or the stream faults.
    pub async fn run(&self) -> Result<RunReport, BridgeError> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<RunReport, BridgeError> {
        let mode = self.config.to_display_mode();
        let plan = plan_mode(&mode, self.config.link.speed)?;

        let endpoint = Arc::new(SimulatedEndpoint::new(self.config.to_endpoint_settings()));
        let engine = StreamEngine::with_options(endpoint.clone(), self.config.to_stream_options());
        engine.configure_plan(&plan)?;
        engine.enable().await?;

        let started = Instant::now();
        let mut fb = SyntheticFramebuffer::new(
            mode.hdisplay as usize,
            mode.vdisplay as usize,
            self.config.run.pitch_padding,
        );
        let streamed = self.stream_frames(&engine, &mut fb).await;
        let frame_periods = *engine.frame_periods().borrow();
        let disable = engine.disable().await;
        let frames_offered = streamed?;

        if let Some(fault) = &disable.fault {
            warn!("stream stopped by fault: {fault}");
        }
        let stranded = endpoint.pending();
        if stranded > 0 {
            warn!("{stranded} transfers still pending at the endpoint after teardown");
        }
        Ok(RunReport {
            plan,
            frames_offered,
            stats: disable.stats,
            frame_periods,
            endpoint: endpoint.stats(),
            disable,
            elapsed: started.elapsed(),
        })
    }

    /// Producer loop. Returns the number of frames offered.
    async fn stream_frames(
        &self,
        engine: &StreamEngine,
        fb: &mut SyntheticFramebuffer,
    ) -> Result<u64, BridgeError> {
        let deadline = match self.config.run.duration_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let report_every = u64::from(self.config.run.fps.max(1));

        let (width, height, pitch) = (fb.width(), fb.height(), fb.pitch());
        let mut offered = 0u64;
        let mut dropped = 0u64;

        while self.running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            ticker.tick().await;

            if engine.fault().is_some() {
                break;
            }
            match engine.submit_frame(fb.render_next(), width, height, pitch) {
                Ok(FrameOutcome::Queued) => {}
                Ok(FrameOutcome::Dropped) => dropped += 1,
                Err(e) => {
                    error!("frame {offered} rejected: {e}");
                    return Err(e);
                }
            }
            offered += 1;

            if offered % report_every == 0 {
                let stats = engine.stats();
                info!(
                    "frames: {offered} offered, {dropped} dropped, {} sent, {} repeats",
                    stats.transfers_completed, stats.repeats
                );
            }
        }
        Ok(offered)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vgabridge_core::TransportError;

    /// A small mode so packing stays cheap in tests.
    fn small_config() -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.mode.hdisplay = 60;
        cfg.mode.vdisplay = 48;
        cfg.run.fps = 200;
        cfg.run.duration_secs = 0;
        cfg
    }

    #[tokio::test]
    async fn run_until_stopped() {
        let runner = BridgeRunner::new(small_config());
        let stop = runner.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.store(false, Ordering::SeqCst);
        });

        let report = runner.run().await.unwrap();
        assert!(!runner.is_running());
        assert!(report.frames_offered > 0);
        assert!(report.stats.frames_queued > 0);
        assert!(report.frame_periods > 0);
        assert!(report.disable.fault.is_none());
        assert!(report.disable.pool.all_free());
        assert_eq!(report.plan.bytes_per_pixel, 3);
        assert_eq!(report.plan.pixel_count, 60 * 48);
        // 60×48×3 bytes is not a multiple of 1024: every data transfer
        // gets a zero-length follow-up.
        assert_eq!(report.endpoint.zero_length_transfers, report.stats.zero_length_sent);
        assert!(report.endpoint.zero_length_transfers > 0);
    }

    #[tokio::test]
    async fn device_failure_ends_run() {
        let mut cfg = small_config();
        cfg.run.duration_secs = 30;
        cfg.link.fail_after = 10;
        let runner = BridgeRunner::new(cfg);

        let report = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .expect("run did not stop on fault")
            .unwrap();
        assert!(matches!(report.disable.fault, Some(TransportError::Fatal(_))));
        assert!(report.endpoint.failures_injected >= 1);
        assert!(report.disable.pool.all_free());
    }

    #[tokio::test]
    async fn stalls_are_recovered() {
        let mut cfg = small_config();
        cfg.link.stall_every = 7;
        let runner = BridgeRunner::new(cfg);
        let stop = runner.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.store(false, Ordering::SeqCst);
        });

        let report = runner.run().await.unwrap();
        assert!(report.disable.fault.is_none());
        assert!(report.endpoint.stalls_injected >= 1);
        assert_eq!(report.endpoint.stalls_cleared, report.stats.stall_retries);
    }

    #[tokio::test]
    async fn unsupported_mode_rejected() {
        let mut cfg = small_config();
        cfg.link.speed = vgabridge_core::SpeedClass::High;
        cfg.mode.clock_khz = 150_000;
        cfg.mode.htotal = 2200;
        let runner = BridgeRunner::new(cfg);
        assert!(matches!(
            runner.run().await,
            Err(BridgeError::BandwidthExceeded { .. })
        ));
        assert!(!runner.is_running());
    }
}
