//! Synthetic XRGB8888 framebuffer.

/// Source bytes per pixel.
const XRGB_BYTES: usize = 4;

/// Filler written into row padding so packing bugs that read it show up.
const PADDING_BYTE: u8 = 0xEE;

/// A framebuffer that renders a moving gradient on every call to
/// [`render_next`](Self::render_next).
pub struct SyntheticFramebuffer {
    width: usize,
    height: usize,
    pitch: usize,
    data: Vec<u8>,
    frame: u32,
}

impl SyntheticFramebuffer {
    /// `padding` extra bytes follow each row's pixels.
    pub fn new(width: usize, height: usize, padding: usize) -> Self {
        let pitch = width * XRGB_BYTES + padding;
        Self {
            width,
            height,
            pitch,
            data: vec![PADDING_BYTE; pitch * height],
            frame: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes from one row to the next.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Frames rendered so far.
    pub fn frame_index(&self) -> u32 {
        self.frame
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Draw the next frame and return the whole buffer.
    pub fn render_next(&mut self) -> &[u8] {
        let t = self.frame;
        for y in 0..self.height {
            let row = &mut self.data[y * self.pitch..y * self.pitch + self.width * XRGB_BYTES];
            for (x, px) in row.chunks_exact_mut(XRGB_BYTES).enumerate() {
                px.copy_from_slice(&gradient(x as u32, y as u32, t).to_le_bytes());
            }
        }
        self.frame = self.frame.wrapping_add(1);
        &self.data
    }
}

/// XRGB value at (`x`, `y`) in frame `t`.
pub fn gradient(x: u32, y: u32, t: u32) -> u32 {
    let r = x.wrapping_add(t) & 0xFF;
    let g = y.wrapping_add(t / 2) & 0xFF;
    let b = (x ^ y) & 0xFF;
    (r << 16) | (g << 8) | b
}

// ── Tests ────────────────────────────────────────────────────────
