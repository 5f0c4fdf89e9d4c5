//! Link bandwidth budget.
//!
//! The bridge streams every frame uncompressed, so the pixel depth is
//! whatever the bulk link can sustain at the mode's pixel clock: three
//! bytes per pixel when there is headroom, fewer when there is not.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Share of the raw signalling rate usable for bulk payload, percent.
pub const BULK_BANDWIDTH_PERCENT: u64 = 100;

/// Deepest packed format supported by the packer.
pub const MAX_BYTES_PER_PIXEL: u8 = 3;

// ── SpeedClass ───────────────────────────────────────────────────

/// Transport speed tier the device enumerated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    /// 480 Mbit/s.
    High,
    /// 5 Gbit/s.
    Super,
    /// 10 Gbit/s.
    SuperPlus,
}

impl SpeedClass {
    /// Raw signalling rate in bits per second.
    pub const fn bit_rate(self) -> u64 {
        match self {
            SpeedClass::High => 480_000_000,
            SpeedClass::Super => 5_000_000_000,
            SpeedClass::SuperPlus => 10_000_000_000,
        }
    }

    /// Maximum bulk payload rate in bytes per second.
    pub const fn max_byte_rate(self) -> u64 {
        self.bit_rate() * BULK_BANDWIDTH_PERCENT / 100 / 8
    }
}

// ── Negotiation ──────────────────────────────────────────────────

/// Bytes per pixel the link can carry at `pixel_clock_hz`.
///
/// `min(3, max_byte_rate / pixel_clock)`; a budget of zero means the
/// mode cannot be streamed at this speed.
pub fn negotiate_bytes_per_pixel(speed: SpeedClass, pixel_clock_hz: u64) -> Result<u8, BridgeError> {
    if pixel_clock_hz == 0 {
        return Err(BridgeError::InvalidConfig("zero pixel clock"));
    }

    let budget = (speed.max_byte_rate() / pixel_clock_hz).min(MAX_BYTES_PER_PIXEL as u64) as u8;
    if budget == 0 {
        return Err(BridgeError::BandwidthExceeded {
            speed,
            pixel_clock_hz,
        });
    }
    Ok(budget)
}

// ── Tests ────────────────────────────────────────────────────────
