//! # Frame streaming
//!
//! Moves packed frames from the display-refresh path to the bulk
//! transport through a fixed pool of transfer buffers.
//!
//! ## Sub-modules
//!
//! | Module    | Purpose                                              |
//! |-----------|------------------------------------------------------|
//! | `pool`    | Buffer pool with Free / Queued / InFlight lists      |
//! | `anchor`  | Outstanding-transfer tracking for teardown           |
//! | `config`  | Per-mode `StreamConfig` and engine `StreamOptions`   |
//! | `state`   | Enabled / Disabled lifecycle phase                   |
//! | `stats`   | Counters and their snapshot                          |
//! | `engine`  | `StreamEngine`: producer, worker, completions        |

pub mod anchor;
pub mod config;
pub mod engine;
pub mod pool;
pub mod state;
pub mod stats;

pub use anchor::Anchor;
pub use config::{BUFFER_ALIGN, StreamConfig, StreamOptions};
pub use engine::{DisableReport, FrameOutcome, StreamEngine};
pub use pool::{
    BufferId, BufferPool, BufferState, MIN_PIPELINE_DEPTH, POOL_SIZE, PoolSnapshot, Selection,
};
pub use state::StreamPhase;
pub use stats::StreamStats;
