//! vgabridge simulator: entry point.
//!
//! ```text
//! vgabridge-sim                      Run with vgabridge-sim.toml (or defaults)
//! vgabridge-sim --config <path>      Load a custom config TOML
//! vgabridge-sim --gen-config         Write default config to stdout
//! vgabridge-sim --duration-secs 0    Stream until Ctrl-C
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vgabridge_sim::config::SimConfig;
use vgabridge_sim::runner::BridgeRunner;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vgabridge-sim", about = "Stream synthetic frames through the VGA bridge pipeline")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vgabridge-sim.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the run length (0 = until Ctrl-C).
    #[arg(long)]
    duration_secs: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&SimConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = SimConfig::load(&cli.config);
    if let Some(secs) = cli.duration_secs {
        config.run.duration_secs = secs;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vgabridge-sim v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "mode: {}x{} @ {} kHz",
        config.mode.hdisplay, config.mode.vdisplay, config.mode.clock_khz
    );
    info!(
        "link: {:?}, {} byte packets",
        config.link.speed, config.link.max_packet_size
    );
    info!("source: {} fps for {} s", config.run.fps, config.run.duration_secs);

    let runner = BridgeRunner::new(config);
    let stop = runner.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    let report = runner.run().await?;

    let plan = &report.plan;
    info!(
        "pll {}/{}/{} ({} ppm), htotal {} → {}, {} bytes/pixel",
        plan.clock.prescaler,
        plan.clock.multiplier,
        plan.clock.divisor,
        plan.clock.ppm_error,
        plan.requested.htotal,
        plan.adjusted.htotal,
        plan.bytes_per_pixel,
    );
    let stats = &report.stats;
    info!(
        "{} frames offered in {:.1?}: {} queued, {} dropped",
        report.frames_offered, report.elapsed, stats.frames_queued, stats.frames_dropped
    );
    info!(
        "{} transfers completed ({} repeats, {} zero-length), {} frame periods",
        stats.transfers_completed, stats.repeats, stats.zero_length_sent, report.frame_periods
    );
    info!(
        "endpoint: {} bytes, {} stalls cleared, {} cancelled",
        report.endpoint.bytes, report.endpoint.stalls_cleared, report.endpoint.cancelled
    );
    if let Some(fault) = &report.disable.fault {
        return Err(format!("stream fault: {fault}").into());
    }
    Ok(())
}
