//! # vgabridge-core
//!
//! Frame-streaming core for a USB-attached VGA display bridge.
//!
//! This crate contains:
//! - **PLL**: `compute_clock` solves the clock synthesizer for a pixel clock
//! - **Bandwidth**: `negotiate_bytes_per_pixel` budgets pixel depth per link speed
//! - **Packing**: XRGB8888 → RGB332 / RGB565 / RGB888 with the device lane swap
//! - **Mode**: `plan_mode` combines the above and derives timing registers
//! - **Stream**: `StreamEngine`, the buffer pool and its completion-driven worker
//! - **Transport**: the `BulkTransport` trait the USB layer implements
//! - **Error**: `BridgeError`: typed, `thiserror`-based error hierarchy

pub mod bandwidth;
pub mod error;
pub mod mode;
pub mod pack;
pub mod pll;
pub mod stream;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bandwidth::{SpeedClass, negotiate_bytes_per_pixel};
pub use error::{BridgeError, TransportError};
pub use mode::{DisplayMode, ModePlan, Timings, plan_mode, validate_mode};
pub use pack::{PackFormat, pack_frame, pack_line};
pub use pll::{SynthesizedClock, VcoBand, compute_clock};
pub use stream::{
    DisableReport, FrameOutcome, PoolSnapshot, StreamConfig, StreamEngine, StreamOptions,
    StreamPhase, StreamStats,
};
pub use transport::{
    BulkTransport, Completion, Transfer, TransferFlags, TransferId, TransferStatus,
};
