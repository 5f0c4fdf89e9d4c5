//! # vgabridge-sim: bridge pipeline simulator
//!
//! Drives the full `vgabridge-core` pipeline without hardware: plans a
//! display mode, renders synthetic XRGB frames, streams them through the
//! `StreamEngine` and completes the transfers on a simulated bulk
//! endpoint with the timing of the configured link.
//!
//! ## Modules
//!
//! | Module        | Purpose                                         |
//! |---------------|-------------------------------------------------|
//! | `config`      | TOML configuration with defaults                |
//! | `endpoint`    | `SimulatedEndpoint`, a `BulkTransport` on Tokio |
//! | `framebuffer` | Moving-gradient XRGB8888 frame source           |
//! | `runner`      | `BridgeRunner`: plan, stream, tear down, report |

pub mod config;
pub mod endpoint;
pub mod framebuffer;
pub mod runner;
