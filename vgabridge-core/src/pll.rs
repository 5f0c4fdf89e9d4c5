//! Clock synthesizer (PLL) parameter search.
//!
//! The bridge derives its pixel clock from a 10 MHz crystal:
//!
//! ```text
//! pixel = crystal / prescaler * multiplier / divisor
//!         └──────────── VCO ────────────┘
//! ```
//!
//! [`compute_clock`] scans every prescaler/multiplier/divisor triple for
//! the combination closest to the requested clock. When nothing lands
//! within [`PPM_LIMIT`], the horizontal total of the mode is nudged by a
//! few pixels (which rescales the required clock) and the search is rerun.
//!
//! All arithmetic is integer fixed-point with a 10^6 scale so truncation
//! never dominates the ppm budget.

use crate::error::BridgeError;

// ── Constants ────────────────────────────────────────────────────

/// Input crystal frequency, Hz.
pub const CRYSTAL_HZ: u32 = 10_000_000;

/// Lowest VCO frequency the synthesizer locks at, Hz.
pub const VCO_MIN_HZ: u32 = 62_500_000;

/// Highest VCO frequency the synthesizer locks at, Hz.
pub const VCO_MAX_HZ: u32 = 1_000_000_000;

/// Highest pixel clock accepted, Hz.
pub const MAX_PIXEL_CLOCK_HZ: u64 = 500_000_000;

/// Largest acceptable deviation from the target clock.
pub const PPM_LIMIT: u64 = 500;

/// Horizontal-total adjustment range, pixels either way.
pub const MAX_HTOTAL_ADJUST: i32 = 10;

/// Fixed-point scale (six decimal digits).
const PRECISION: u64 = 1_000_000;

const PRESCALER_MAX: u32 = 2;
const MULTIPLIER_MAX: u32 = 128;

/// Output divisors supported by the synthesizer: 2, 4, 6, then 7..=128.
const DIVISORS: [u32; 125] = {
    let mut table = [0u32; 125];
    table[0] = 2;
    table[1] = 4;
    table[2] = 6;
    let mut i = 3;
    while i < table.len() {
        table[i] = i as u32 + 4;
        i += 1;
    }
    table
};

// ── VcoBand ──────────────────────────────────────────────────────

/// VCO frequency range, programmed alongside the divider chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcoBand {
    /// Below 125 MHz.
    Low = 0,
    /// 125 MHz up to 250 MHz.
    Mid = 1,
    /// 250 MHz up to 500 MHz.
    High = 2,
    /// 500 MHz and above.
    Top = 3,
}

impl VcoBand {
    /// Classify a VCO frequency.
    pub const fn from_vco(vco_hz: u32) -> Self {
        if vco_hz < 125_000_000 {
            VcoBand::Low
        } else if vco_hz < 250_000_000 {
            VcoBand::Mid
        } else if vco_hz < 500_000_000 {
            VcoBand::High
        } else {
            VcoBand::Top
        }
    }

    /// Register encoding of the band.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

// ── SynthesizedClock ─────────────────────────────────────────────

/// A solved synthesizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesizedClock {
    pub prescaler: u32,
    pub multiplier: u32,
    pub divisor: u32,
    pub band: VcoBand,
    /// Deviation from the (htotal-adjusted) target, parts per million.
    pub ppm_error: u64,
    /// `CRYSTAL_HZ / prescaler * multiplier`.
    pub vco_hz: u32,
    /// `vco_hz / divisor`, truncated to whole hertz.
    pub achieved_hz: u32,
    /// Horizontal total the clock was solved for.
    pub htotal: u32,
    /// Adjustment applied to the requested horizontal total.
    pub htotal_delta: i32,
}

/// Best triple found by one exhaustive pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub prescaler: u32,
    pub multiplier: u32,
    pub divisor: u32,
    pub vco_hz: u32,
    pub ppm_error: u64,
}

// ── Search ───────────────────────────────────────────────────────

/// Solve the synthesizer for `target_hz`, adjusting `htotal` if needed.
///
/// Deltas are tried in the order 0, −1, +1, −2, +2, … ±10 and the first
/// one whose best error is under [`PPM_LIMIT`] wins, even if a later
/// delta would be closer.
pub fn compute_clock(target_hz: u64, htotal: u32) -> Result<SynthesizedClock, BridgeError> {
    if target_hz == 0 {
        return Err(BridgeError::ModeUnsupported {
            clock_hz: target_hz,
            reason: "zero pixel clock",
        });
    }
    if target_hz > MAX_PIXEL_CLOCK_HZ {
        return Err(BridgeError::ModeUnsupported {
            clock_hz: target_hz,
            reason: "pixel clock above limit",
        });
    }
    if htotal == 0 {
        return Err(BridgeError::ModeUnsupported {
            clock_hz: target_hz,
            reason: "zero horizontal total",
        });
    }

    for delta in htotal_deltas(MAX_HTOTAL_ADJUST) {
        let Some(clock_mil) = adjusted_clock_mil(target_hz, htotal, delta) else {
            continue;
        };
        let Some(best) = search(clock_mil) else {
            continue;
        };
        if best.ppm_error < PPM_LIMIT {
            return Ok(SynthesizedClock {
                prescaler: best.prescaler,
                multiplier: best.multiplier,
                divisor: best.divisor,
                band: VcoBand::from_vco(best.vco_hz),
                ppm_error: best.ppm_error,
                vco_hz: best.vco_hz,
                achieved_hz: best.vco_hz / best.divisor,
                htotal: (htotal as i64 + delta as i64) as u32,
                htotal_delta: delta,
            });
        }
    }

    Err(BridgeError::ModeUnsupported {
        clock_hz: target_hz,
        reason: "no synthesizer configuration within tolerance",
    })
}

/// Zig-zag adjustment order: 0, −1, +1, −2, +2, … ±`limit`.
pub fn htotal_deltas(limit: i32) -> impl Iterator<Item = i32> {
    std::iter::once(0).chain((1..=limit).flat_map(|m| [-m, m]))
}

/// Target clock ×10^6 rescaled for `htotal + delta`.
///
/// `None` when the adjusted total would not be positive.
pub(crate) fn adjusted_clock_mil(target_hz: u64, htotal: u32, delta: i32) -> Option<u64> {
    let adjusted_total = htotal as i64 + delta as i64;
    if adjusted_total <= 0 {
        return None;
    }
    let scaled =
        target_hz as u128 * PRECISION as u128 * adjusted_total as u128 / htotal as u128;
    u64::try_from(scaled).ok()
}

/// One exhaustive pass over prescaler × multiplier × divisor.
///
/// The minimum is tracked across the whole triple loop; ties keep the
/// first combination met.
pub(crate) fn search(clock_mil: u64) -> Option<Candidate> {
    if clock_mil < PRECISION {
        return None;
    }

    let mut best: Option<Candidate> = None;
    for prescaler in 1..=PRESCALER_MAX {
        for multiplier in 1..=MULTIPLIER_MAX {
            let vco_hz = CRYSTAL_HZ / prescaler * multiplier;
            if !(VCO_MIN_HZ..=VCO_MAX_HZ).contains(&vco_hz) {
                continue;
            }
            for &divisor in DIVISORS.iter() {
                let ppm_error = ppm_error(clock_mil, vco_hz, divisor);
                let improves = match best {
                    Some(b) => ppm_error < b.ppm_error,
                    None => true,
                };
                if improves {
                    best = Some(Candidate {
                        prescaler,
                        multiplier,
                        divisor,
                        vco_hz,
                        ppm_error,
                    });
                }
            }
        }
    }
    best
}

/// `|vco/divisor − target| / target × 10^6`, both sides scaled by 10^6.
fn ppm_error(clock_mil: u64, vco_hz: u32, divisor: u32) -> u64 {
    let pll_mil = vco_hz as u64 * PRECISION / divisor as u64;
    pll_mil.abs_diff(clock_mil) / (clock_mil / PRECISION)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_table_shape() {
        assert_eq!(&DIVISORS[..5], &[2, 4, 6, 7, 8]);
        assert_eq!(DIVISORS[DIVISORS.len() - 1], 128);
        assert!(DIVISORS.windows(2).all(|w| w[0] < w[1]));
        assert!(!DIVISORS.contains(&3));
        assert!(!DIVISORS.contains(&5));
    }

    #[test]
    fn zig_zag_order() {
        let deltas: Vec<i32> = htotal_deltas(3).collect();
        assert_eq!(deltas, vec![0, -1, 1, -2, 2, -3, 3]);
        assert_eq!(htotal_deltas(MAX_HTOTAL_ADJUST).count(), 21);
        assert_eq!(htotal_deltas(MAX_HTOTAL_ADJUST).last(), Some(10));
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(VcoBand::from_vco(124_999_999), VcoBand::Low);
        assert_eq!(VcoBand::from_vco(125_000_000), VcoBand::Mid);
        assert_eq!(VcoBand::from_vco(250_000_000), VcoBand::High);
        assert_eq!(VcoBand::from_vco(500_000_000), VcoBand::Top);
        assert_eq!(VcoBand::Top.code(), 3);
    }

    #[test]
    fn exact_vga_clock() {
        // 25.175 MHz, the classic 640x480@60 clock.
        let clock = compute_clock(25_175_000, 800).unwrap();
        assert!(clock.ppm_error < PPM_LIMIT);
        assert_eq!(clock.htotal, 800);
        assert_eq!(clock.htotal_delta, 0);
        assert_eq!(clock.vco_hz, CRYSTAL_HZ / clock.prescaler * clock.multiplier);
        assert_eq!(clock.achieved_hz, clock.vco_hz / clock.divisor);
    }

    #[test]
    fn exact_match_has_zero_error() {
        // 65 MHz = 650 MHz / 10.
        let clock = compute_clock(65_000_000, 1344).unwrap();
        assert_eq!(clock.ppm_error, 0);
        assert_eq!(clock.achieved_hz, 65_000_000);
        assert_eq!(clock.band, VcoBand::from_vco(clock.vco_hz));
    }

    #[test]
    fn first_minimum_wins_on_ties() {
        // 50 MHz is reachable from many VCOs (100/2, 200/4, ...); the
        // first exact hit in loop order is prescaler 1, multiplier 10,
        // divisor 2.
        let best = search(50_000_000 * PRECISION).unwrap();
        assert_eq!(best.ppm_error, 0);
        assert_eq!((best.prescaler, best.multiplier, best.divisor), (1, 10, 2));
    }

    #[test]
    fn htotal_adjustment_rescues_prime_clock() {
        // 499 MHz needs a VCO of 998 MHz, unreachable in 5 MHz steps;
        // only a stretched line gets within tolerance.
        let direct = search(499_000_000 * PRECISION).unwrap();
        assert!(direct.ppm_error >= PPM_LIMIT);

        let clock = compute_clock(499_000_000, 2200).unwrap();
        assert_ne!(clock.htotal_delta, 0);
        assert_eq!(clock.htotal as i64, 2200 + clock.htotal_delta as i64);
        assert!(clock.ppm_error < PPM_LIMIT);
    }

    #[test]
    fn first_passing_delta_is_accepted() {
        let clock = compute_clock(499_000_000, 2200).unwrap();
        for delta in htotal_deltas(MAX_HTOTAL_ADJUST) {
            if delta == clock.htotal_delta {
                break;
            }
            let mil = adjusted_clock_mil(499_000_000, 2200, delta).unwrap();
            assert!(search(mil).unwrap().ppm_error >= PPM_LIMIT, "delta {delta}");
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            compute_clock(500_000_001, 2200),
            Err(BridgeError::ModeUnsupported { .. })
        ));
        assert!(matches!(
            compute_clock(0, 2200),
            Err(BridgeError::ModeUnsupported { .. })
        ));
        assert!(matches!(
            compute_clock(25_000_000, 0),
            Err(BridgeError::ModeUnsupported { .. })
        ));
    }

    #[test]
    fn whole_range_within_tolerance_or_exhausted() {
        for htotal in [800u32, 2200] {
            for mhz in 25u64..=500 {
                let target = mhz * 1_000_000;
                match compute_clock(target, htotal) {
                    Ok(clock) => {
                        assert!(clock.ppm_error < PPM_LIMIT, "{mhz} MHz");
                        assert!(
                            (VCO_MIN_HZ..=VCO_MAX_HZ).contains(&clock.vco_hz),
                            "{mhz} MHz vco {}",
                            clock.vco_hz
                        );
                        assert!(clock.htotal_delta.abs() <= MAX_HTOTAL_ADJUST);
                    }
                    Err(BridgeError::ModeUnsupported { .. }) => {
                        for delta in htotal_deltas(MAX_HTOTAL_ADJUST) {
                            let mil = adjusted_clock_mil(target, htotal, delta).unwrap();
                            let best = search(mil).unwrap();
                            assert!(best.ppm_error >= PPM_LIMIT, "{mhz} MHz delta {delta}");
                        }
                    }
                    Err(e) => panic!("{mhz} MHz: unexpected {e}"),
                }
            }
        }
    }
}
