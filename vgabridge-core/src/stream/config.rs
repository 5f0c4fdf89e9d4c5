//! Per-mode stream configuration and engine tunables.

use std::time::Duration;

use crate::error::BridgeError;
use crate::pack::PackFormat;

/// Transfer buffers are sized in whole 64-bit device words.
pub const BUFFER_ALIGN: usize = 8;

// ── StreamConfig ─────────────────────────────────────────────────

/// Pixel depth and buffer size for the committed mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub bytes_per_pixel: u8,
    pub pixel_count: usize,
    /// `pixel_count * bytes_per_pixel` rounded up to [`BUFFER_ALIGN`].
    pub buffer_size: usize,
}

impl StreamConfig {
    pub fn new(bytes_per_pixel: u8, pixel_count: usize) -> Result<Self, BridgeError> {
        if PackFormat::from_bytes_per_pixel(bytes_per_pixel).is_none() {
            return Err(BridgeError::InvalidConfig("bytes per pixel must be 1, 2 or 3"));
        }
        if pixel_count == 0 {
            return Err(BridgeError::InvalidConfig("pixel count must be non-zero"));
        }
        let buffer_size = pixel_count
            .checked_mul(bytes_per_pixel as usize)
            .and_then(|n| n.checked_next_multiple_of(BUFFER_ALIGN))
            .ok_or(BridgeError::InvalidConfig("frame size overflows"))?;

        Ok(Self {
            bytes_per_pixel,
            pixel_count,
            buffer_size,
        })
    }

    pub fn format(&self) -> PackFormat {
        match self.bytes_per_pixel {
            1 => PackFormat::Rgb332,
            2 => PackFormat::Rgb565,
            _ => PackFormat::Rgb888,
        }
    }
}

// ── StreamOptions ────────────────────────────────────────────────

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// How long `disable` waits for outstanding transfers before killing them.
    pub disable_timeout: Duration,
    /// How long killed transfers get to report back before being forgotten.
    pub kill_grace: Duration,
    /// Submission attempts on transient errors, first try included.
    pub submit_attempts: u32,
    /// Pause between transient-error resubmissions.
    pub submit_backoff: Duration,
    /// Clear-and-resubmit rounds allowed per stalled transfer.
    pub stall_retries: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            disable_timeout: Duration::from_secs(1),
            kill_grace: Duration::from_millis(100),
            submit_attempts: 10,
            submit_backoff: Duration::from_millis(1),
            stall_retries: 1,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
