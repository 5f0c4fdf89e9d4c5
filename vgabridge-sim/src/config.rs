//! Configuration for the bridge simulator.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vgabridge_core::{DisplayMode, SpeedClass, StreamOptions};

use crate::endpoint::EndpointSettings;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Display mode to stream.
    pub mode: ModeConfig,
    /// Simulated bulk link.
    pub link: LinkConfig,
    /// Stream engine tuning.
    pub stream: StreamTuning,
    /// Run length and frame source.
    pub run: RunConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Display mode, modeline style.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Pixel clock in kHz.
    pub clock_khz: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
}

/// Simulated bulk endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link speed class: "high", "super", "super_plus".
    pub speed: SpeedClass,
    /// Maximum packet size in bytes.
    pub max_packet_size: usize,
    /// Fixed per-transfer latency in microseconds, on top of wire time.
    pub latency_us: u64,
    /// Stall every Nth data transfer (0 = never).
    pub stall_every: u64,
    /// Fail all data transfers after this many (0 = never).
    pub fail_after: u64,
}

/// Stream engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamTuning {
    /// Wait for outstanding transfers on disable, milliseconds.
    pub disable_timeout_ms: u64,
    /// Grace period after killing transfers, milliseconds.
    pub kill_grace_ms: u64,
    /// Submission attempts on transient errors.
    pub submit_attempts: u32,
    /// Backoff between transient retries, microseconds.
    pub submit_backoff_us: u64,
    /// Clear-and-resubmit rounds per stalled transfer.
    pub stall_retries: u32,
}

/// Run length and frame source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// How long to stream (0 = until stopped).
    pub duration_secs: u64,
    /// Frames produced per second.
    pub fps: u32,
    /// Extra bytes at the end of every framebuffer row.
    pub pitch_padding: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mode: ModeConfig::default(),
            link: LinkConfig::default(),
            stream: StreamTuning::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ModeConfig {
    /// 640x480@60.
    fn default() -> Self {
        Self {
            clock_khz: 25_175,
            hdisplay: 640,
            hsync_start: 656,
            hsync_end: 752,
            htotal: 800,
            vdisplay: 480,
            vsync_start: 490,
            vsync_end: 492,
            vtotal: 525,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            speed: SpeedClass::Super,
            max_packet_size: 1024,
            latency_us: 125,
            stall_every: 0,
            fail_after: 0,
        }
    }
}

impl Default for StreamTuning {
    fn default() -> Self {
        let o = StreamOptions::default();
        Self {
            disable_timeout_ms: o.disable_timeout.as_millis() as u64,
            kill_grace_ms: o.kill_grace.as_millis() as u64,
            submit_attempts: o.submit_attempts,
            submit_backoff_us: o.submit_backoff.as_micros() as u64,
            stall_retries: o.stall_retries,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            fps: 60,
            pitch_padding: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SimConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The configured display mode.
    pub fn to_display_mode(&self) -> DisplayMode {
        let m = &self.mode;
        DisplayMode {
            clock_khz: m.clock_khz,
            hdisplay: m.hdisplay,
            hsync_start: m.hsync_start,
            hsync_end: m.hsync_end,
            htotal: m.htotal,
            vdisplay: m.vdisplay,
            vsync_start: m.vsync_start,
            vsync_end: m.vsync_end,
            vtotal: m.vtotal,
        }
    }

    /// Convert the tuning section into engine options.
    pub fn to_stream_options(&self) -> StreamOptions {
        let s = &self.stream;
        StreamOptions {
            disable_timeout: Duration::from_millis(s.disable_timeout_ms),
            kill_grace: Duration::from_millis(s.kill_grace_ms),
            submit_attempts: s.submit_attempts.max(1),
            submit_backoff: Duration::from_micros(s.submit_backoff_us),
            stall_retries: s.stall_retries,
        }
    }

    /// Convert the link section into endpoint settings.
    pub fn to_endpoint_settings(&self) -> EndpointSettings {
        let l = &self.link;
        EndpointSettings {
            speed: l.speed,
            max_packet_size: l.max_packet_size.max(1),
            latency: Duration::from_micros(l.latency_us),
            stall_every: l.stall_every,
            fail_after: l.fail_after,
        }
    }

    /// Frame interval for the configured rate, clamped to 1..=240 fps.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.run.fps.clamp(1, 240)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = SimConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("clock_khz"));
        assert!(text.contains("speed = \"super\""));
        assert!(text.contains("duration_secs"));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let text = r#"
            [link]
            speed = "high"
            stall_every = 50

            [run]
            fps = 30
        "#;
        let cfg: SimConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.link.speed, SpeedClass::High);
        assert_eq!(cfg.link.stall_every, 50);
        assert_eq!(cfg.link.max_packet_size, 1024);
        assert_eq!(cfg.run.fps, 30);
        assert_eq!(cfg.mode.hdisplay, 640);
    }

    #[test]
    fn to_stream_options_matches_engine_defaults() {
        let cfg = SimConfig::default();
        let o = cfg.to_stream_options();
        let d = StreamOptions::default();
        assert_eq!(o.disable_timeout, d.disable_timeout);
        assert_eq!(o.kill_grace, d.kill_grace);
        assert_eq!(o.submit_attempts, d.submit_attempts);
        assert_eq!(o.submit_backoff, d.submit_backoff);
        assert_eq!(o.stall_retries, d.stall_retries);
    }

    #[test]
    fn display_mode_conversion() {
        let mode = SimConfig::default().to_display_mode();
        assert_eq!(mode.clock_khz, 25_175);
        assert_eq!(mode.htotal, 800);
        assert_eq!(mode.vtotal, 525);
    }

    #[test]
    fn frame_interval_clamps() {
        let mut cfg = SimConfig::default();
        cfg.run.fps = 0;
        assert_eq!(cfg.frame_interval(), Duration::from_secs(1));
        cfg.run.fps = 1000;
        assert_eq!(cfg.frame_interval(), Duration::from_secs(1) / 240);
    }

    #[test]
    fn write_and_load_default() {
        let path = std::env::temp_dir().join(format!("vgabridge-sim-{}.toml", std::process::id()));
        SimConfig::write_default(&path).unwrap();
        let cfg = SimConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.run.fps, 60);
        assert_eq!(cfg.link.speed, SpeedClass::Super);
    }
}
