//! Display mode planning.
//!
//! Turns a requested display mode into everything the mode-set path has
//! to program: synthesizer parameters, the (possibly stretched) mode the
//! hardware will actually run, the pixel depth the link can carry and
//! the timing register values.

use tracing::{debug, info};

use crate::bandwidth::{SpeedClass, negotiate_bytes_per_pixel};
use crate::error::BridgeError;
use crate::pll::{SynthesizedClock, compute_clock};

/// Largest supported active width, pixels.
pub const MAX_WIDTH: u32 = 4000;

/// Largest supported active height, lines.
pub const MAX_HEIGHT: u32 = 4000;

// ── DisplayMode ──────────────────────────────────────────────────

/// A display mode in the usual modeline form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    /// Pixel clock, kHz.
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

impl DisplayMode {
    /// Pixel clock in hertz.
    pub fn clock_hz(&self) -> u64 {
        self.clock_khz as u64 * 1000
    }

    /// Active pixels per frame.
    pub fn pixel_count(&self) -> usize {
        self.hdisplay as usize * self.vdisplay as usize
    }

    /// Vertical refresh rate in millihertz.
    pub fn refresh_mhz(&self) -> u64 {
        let frame = self.htotal as u64 * self.vtotal as u64;
        if frame == 0 {
            return 0;
        }
        self.clock_hz() * 1000 / frame
    }

    fn check_ordering(&self) -> Result<(), BridgeError> {
        let horizontal = self.hdisplay <= self.hsync_start
            && self.hsync_start <= self.hsync_end
            && self.hsync_end <= self.htotal;
        let vertical = self.vdisplay <= self.vsync_start
            && self.vsync_start <= self.vsync_end
            && self.vsync_end <= self.vtotal;
        if horizontal && vertical {
            Ok(())
        } else {
            Err(BridgeError::InvalidConfig("mode timings out of order"))
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} kHz {} {} {} {} {} {} {} {}",
            self.hdisplay,
            self.vdisplay,
            self.clock_khz,
            self.hdisplay,
            self.hsync_start,
            self.hsync_end,
            self.htotal,
            self.vdisplay,
            self.vsync_start,
            self.vsync_end,
            self.vtotal,
        )
    }
}

// ── Timings ──────────────────────────────────────────────────────

/// Timing register values derived from a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub hactive: u32,
    pub htotal: u32,
    pub hsync_width: u32,
    pub hstart: u32,
    pub vactive: u32,
    pub vtotal: u32,
    pub vsync_width: u32,
    pub vstart: u32,
}

impl Timings {
    /// Derive register values. Fails if the sync pulses do not fit
    /// inside the totals.
    pub fn from_mode(mode: &DisplayMode) -> Result<Self, BridgeError> {
        let span = |from: u32, to: u32| {
            to.checked_sub(from)
                .ok_or(BridgeError::InvalidConfig("mode timings out of order"))
        };
        Ok(Self {
            hactive: mode.hdisplay,
            htotal: mode.htotal,
            hsync_width: span(mode.hsync_start, mode.hsync_end)?,
            hstart: span(mode.hsync_start, mode.htotal)? + 1,
            vactive: mode.vdisplay,
            vtotal: mode.vtotal,
            vsync_width: span(mode.vsync_start, mode.vsync_end)?,
            vstart: span(mode.vsync_start, mode.vtotal)? + 1,
        })
    }
}

// ── ModePlan ─────────────────────────────────────────────────────

/// Everything the mode-set path needs for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePlan {
    /// The mode as requested.
    pub requested: DisplayMode,
    /// The mode the hardware will run (htotal and clock adjusted).
    pub adjusted: DisplayMode,
    pub clock: SynthesizedClock,
    pub bytes_per_pixel: u8,
    pub timings: Timings,
    /// Pixels per frame handed to the stream engine.
    pub pixel_count: usize,
}

/// Plan `mode` for a link of class `speed`.
pub fn plan_mode(mode: &DisplayMode, speed: SpeedClass) -> Result<ModePlan, BridgeError> {
    if mode.hdisplay == 0 || mode.vdisplay == 0 {
        return Err(BridgeError::InvalidConfig("empty mode"));
    }
    if mode.hdisplay > MAX_WIDTH || mode.vdisplay > MAX_HEIGHT {
        return Err(BridgeError::ModeUnsupported {
            clock_hz: mode.clock_hz(),
            reason: "resolution above limit",
        });
    }
    mode.check_ordering()?;

    let clock = compute_clock(mode.clock_hz(), mode.htotal)?;

    let mut adjusted = *mode;
    adjusted.htotal = clock.htotal;
    adjusted.clock_khz = clock.achieved_hz / 1000;
    // A shortened line must still hold the horizontal sync pulse.
    if adjusted.htotal < adjusted.hsync_end {
        return Err(BridgeError::ModeUnsupported {
            clock_hz: mode.clock_hz(),
            reason: "adjusted line too short for sync",
        });
    }
    let timings = Timings::from_mode(&adjusted)?;

    let bytes_per_pixel = negotiate_bytes_per_pixel(speed, adjusted.clock_hz())?;

    debug!("mode requested:  {mode}");
    debug!("mode configured: {adjusted}");
    info!(
        "mode {}x{}: pll {}/{}/{} band {:?}, {} ppm, {} bytes/pixel",
        mode.hdisplay,
        mode.vdisplay,
        clock.prescaler,
        clock.multiplier,
        clock.divisor,
        clock.band,
        clock.ppm_error,
        bytes_per_pixel,
    );

    Ok(ModePlan {
        requested: *mode,
        adjusted,
        clock,
        bytes_per_pixel,
        timings,
        pixel_count: mode.pixel_count(),
    })
}

/// Whether `mode` can be driven over a link of class `speed`.
pub fn validate_mode(mode: &DisplayMode, speed: SpeedClass) -> Result<(), BridgeError> {
    plan_mode(mode, speed).map(|_| ())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pll::PPM_LIMIT;

    fn vga() -> DisplayMode {
        DisplayMode {
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

    fn xga() -> DisplayMode {
        DisplayMode {
            clock_khz: 65_000,
            hdisplay: 1024,
            hsync_start: 1048,
            hsync_end: 1184,
            htotal: 1344,
            vdisplay: 768,
            vsync_start: 771,
            vsync_end: 777,
            vtotal: 806,
        }
    }

    #[test]
    fn timings_from_vga() {
        let t = Timings::from_mode(&vga()).unwrap();
        assert_eq!(t.hactive, 640);
        assert_eq!(t.hsync_width, 96);
        assert_eq!(t.hstart, 800 - 656 + 1);
        assert_eq!(t.vsync_width, 2);
        assert_eq!(t.vstart, 525 - 490 + 1);
    }

    #[test]
    fn plan_vga_high_speed() {
        let plan = plan_mode(&vga(), SpeedClass::High).unwrap();
        assert_eq!(plan.bytes_per_pixel, 2);
        assert_eq!(plan.pixel_count, 640 * 480);
        assert!(plan.clock.ppm_error < PPM_LIMIT);
        assert_eq!(plan.adjusted.htotal, plan.clock.htotal);
        assert_eq!(plan.adjusted.clock_khz, plan.clock.achieved_hz / 1000);
        assert_eq!(plan.timings.htotal, plan.adjusted.htotal);
    }

    #[test]
    fn plan_xga_needs_super_speed() {
        assert!(matches!(
            plan_mode(&xga(), SpeedClass::High),
            Err(BridgeError::BandwidthExceeded { .. })
        ));
        let plan = plan_mode(&xga(), SpeedClass::Super).unwrap();
        assert_eq!(plan.bytes_per_pixel, 3);
        assert_eq!(plan.adjusted.clock_khz, 65_000);
    }

    #[test]
    fn oversized_mode_rejected() {
        let mut mode = vga();
        mode.hdisplay = 4096;
        mode.hsync_start = 4100;
        mode.hsync_end = 4200;
        mode.htotal = 4400;
        assert!(matches!(
            validate_mode(&mode, SpeedClass::SuperPlus),
            Err(BridgeError::ModeUnsupported { .. })
        ));
    }

    #[test]
    fn disordered_mode_rejected() {
        let mut mode = vga();
        mode.hsync_end = 900;
        assert!(matches!(
            validate_mode(&mode, SpeedClass::Super),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn timings_reject_sync_past_total() {
        let mut mode = vga();
        mode.htotal = 700;
        assert!(matches!(
            Timings::from_mode(&mode),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn shortened_line_must_hold_sync() {
        // At this clock the synthesizer trims htotal by two pixels,
        // which would put it before hsync_start.
        let mode = DisplayMode {
            clock_khz: 25_024,
            hdisplay: 1920,
            hsync_start: 2200,
            hsync_end: 2200,
            htotal: 2200,
            vdisplay: 1080,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal: 1125,
        };
        assert!(compute_clock(mode.clock_hz(), mode.htotal).unwrap().htotal_delta < 0);
        assert!(matches!(
            plan_mode(&mode, SpeedClass::SuperPlus),
            Err(BridgeError::ModeUnsupported { .. })
        ));
    }

    #[test]
    fn refresh_rate() {
        // 25.175 MHz / (800 * 525) ≈ 59.94 Hz.
        assert_eq!(vga().refresh_mhz(), 59_940);
    }
}
