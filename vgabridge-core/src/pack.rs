//! XRGB8888 → device pixel format packing.
//!
//! The framebuffer always hands us 32-bit XRGB pixels (little-endian in
//! memory). The device accepts three packed depths:
//!
//! | Format   | Bytes | Layout                      |
//! |----------|-------|-----------------------------|
//! | `Rgb332` | 1     | `RRGGGBBB` (2-bit red)      |
//! | `Rgb565` | 2     | `RRRRRGGG GGGBBBBB`, LE     |
//! | `Rgb888` | 3     | B, G, R                     |
//!
//! The device reads the stream in 64-bit words with the two 32-bit
//! halves exchanged, so every destination byte offset is XORed with
//! [`LANE_SWAP`]. Offsets are relative to the start of the transfer
//! buffer, not to each line: the swap follows the device's 64-bit stream
//! words, so a line whose packed length is not a multiple of 8 shares a
//! word with the next one. Buffers are sized in multiples of 8 bytes, so
//! the swapped offset never leaves the buffer.

use crate::error::BridgeError;

/// Destination offset swizzle compensating the device byte lanes.
pub const LANE_SWAP: usize = 4;

/// Source bytes per pixel (XRGB8888).
pub const SOURCE_BYTES_PER_PIXEL: usize = 4;

// ── PackFormat ───────────────────────────────────────────────────

/// Packed pixel layout on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackFormat {
    Rgb332,
    Rgb565,
    Rgb888,
}

impl PackFormat {
    /// Layout for a negotiated pixel depth.
    pub const fn from_bytes_per_pixel(bytes_per_pixel: u8) -> Option<Self> {
        match bytes_per_pixel {
            1 => Some(PackFormat::Rgb332),
            2 => Some(PackFormat::Rgb565),
            3 => Some(PackFormat::Rgb888),
            _ => None,
        }
    }

    /// Bytes one packed pixel occupies.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PackFormat::Rgb332 => 1,
            PackFormat::Rgb565 => 2,
            PackFormat::Rgb888 => 3,
        }
    }
}

// ── Frame packing ────────────────────────────────────────────────

/// Check frame geometry against the source slice and a destination of
/// `capacity` bytes.
///
/// `src` must hold `height` rows of `pitch` bytes (the last row may stop
/// right after its pixels). Returns the packed length
/// (`width * height * bytes_per_pixel`).
pub fn validate_frame(
    format: PackFormat,
    src_len: usize,
    width: usize,
    height: usize,
    pitch: usize,
    capacity: usize,
) -> Result<usize, BridgeError> {
    if width == 0 || height == 0 {
        return Err(BridgeError::InvalidFrame("empty frame"));
    }
    let src_line_len = width
        .checked_mul(SOURCE_BYTES_PER_PIXEL)
        .ok_or(BridgeError::InvalidFrame("row too wide"))?;
    if pitch < src_line_len {
        return Err(BridgeError::InvalidFrame("pitch shorter than a row"));
    }
    let needed = pitch
        .checked_mul(height - 1)
        .and_then(|n| n.checked_add(src_line_len))
        .ok_or(BridgeError::InvalidFrame("frame too tall"))?;
    if src_len < needed {
        return Err(BridgeError::InvalidFrame("source shorter than frame"));
    }
    let packed_len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
        .ok_or(BridgeError::InvalidFrame("frame too large"))?;
    // The swizzle reaches up to the end of the enclosing 8-byte word.
    if packed_len.next_multiple_of(8) > capacity {
        return Err(BridgeError::FrameTooLarge {
            size: packed_len,
            max: capacity,
        });
    }
    Ok(packed_len)
}

/// Pack a whole frame into `dst`.
///
/// `src` holds `height` rows of `pitch` bytes; only the first
/// `width * 4` bytes of each row are read. Returns the packed length.
pub fn pack_frame(
    format: PackFormat,
    src: &[u8],
    width: usize,
    height: usize,
    pitch: usize,
    dst: &mut [u8],
) -> Result<usize, BridgeError> {
    let packed_len = validate_frame(format, src.len(), width, height, pitch, dst.len())?;
    let src_line_len = width * SOURCE_BYTES_PER_PIXEL;
    let dst_line_len = width * format.bytes_per_pixel();

    for y in 0..height {
        let row = &src[y * pitch..y * pitch + src_line_len];
        pack_line(format, row, dst, y * dst_line_len);
    }
    Ok(packed_len)
}

/// Pack one row of XRGB pixels starting at buffer offset `offset`.
pub fn pack_line(format: PackFormat, src: &[u8], dst: &mut [u8], offset: usize) {
    match format {
        PackFormat::Rgb332 => pack_rgb332_line(src, dst, offset),
        PackFormat::Rgb565 => pack_rgb565_line(src, dst, offset),
        PackFormat::Rgb888 => pack_rgb888_line(src, dst, offset),
    }
}

fn pixels(src: &[u8]) -> impl Iterator<Item = u32> + '_ {
    src.chunks_exact(SOURCE_BYTES_PER_PIXEL)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

fn pack_rgb332_line(src: &[u8], dst: &mut [u8], offset: usize) {
    for (x, pix) in pixels(src).enumerate() {
        let val = ((pix & 0x00C0_0000) >> 16) | ((pix & 0x0000_E000) >> 10) | ((pix & 0x0000_00E0) >> 5);
        dst[(offset + x) ^ LANE_SWAP] = val as u8;
    }
}

fn pack_rgb565_line(src: &[u8], dst: &mut [u8], offset: usize) {
    for (x, pix) in pixels(src).enumerate() {
        let val = ((pix & 0x00F8_0000) >> 8) | ((pix & 0x0000_FC00) >> 5) | ((pix & 0x0000_00F8) >> 3);
        let [lo, hi] = (val as u16).to_le_bytes();
        let at = offset + 2 * x;
        dst[at ^ LANE_SWAP] = lo;
        dst[(at + 1) ^ LANE_SWAP] = hi;
    }
}

fn pack_rgb888_line(src: &[u8], dst: &mut [u8], offset: usize) {
    for (x, pix) in pixels(src).enumerate() {
        let at = offset + 3 * x;
        dst[at ^ LANE_SWAP] = pix as u8;
        dst[(at + 1) ^ LANE_SWAP] = (pix >> 8) as u8;
        dst[(at + 2) ^ LANE_SWAP] = (pix >> 16) as u8;
    }
}

// ── Tests ────────────────────────────────────────────────────────
