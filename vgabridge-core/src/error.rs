//! Domain-specific error types for the display bridge.
//!
//! All fallible operations return `Result<T, BridgeError>`.
//! No panics on invalid input; every error is typed and recoverable.

use thiserror::Error;

use crate::bandwidth::SpeedClass;

/// The canonical error type for the display bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Mode Errors ──────────────────────────────────────────────
    /// No clock synthesizer configuration reproduces the requested mode.
    #[error("mode unsupported at {clock_hz} Hz: {reason}")]
    ModeUnsupported { clock_hz: u64, reason: &'static str },

    /// The link cannot carry even one byte per pixel at this clock.
    #[error("bandwidth exceeded: {pixel_clock_hz} Hz pixel clock on {speed:?} link")]
    BandwidthExceeded {
        speed: SpeedClass,
        pixel_clock_hz: u64,
    },

    // ── Resource Errors ──────────────────────────────────────────
    /// A transfer buffer could not be allocated.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    // ── Caller Errors ────────────────────────────────────────────
    /// A configuration value is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The operation is not valid in the engine's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The source frame geometry is inconsistent.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// The packed frame does not fit the configured transfer buffer.
    #[error("frame too large: {size} bytes (buffer {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The bulk transport reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TransportError ───────────────────────────────────────────────

/// Error classes reported by the bulk transport collaborator.
///
/// Cloneable so the same fault can be recorded on the engine and
/// surfaced to the caller that tears the stream down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Temporary resource exhaustion; the submission may be retried.
    #[error("transient: {0}")]
    Transient(String),

    /// The endpoint is halted and must be cleared before reuse.
    #[error("endpoint stalled")]
    Stall,

    /// The transfer was killed before it completed.
    #[error("transfer cancelled")]
    Cancelled,

    /// Any other failure. Streaming cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Whether the submission may be retried as-is after a short backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = BridgeError::ModeUnsupported {
            clock_hz: 600_000_000,
            reason: "pixel clock above limit",
        };
        assert!(e.to_string().contains("600000000"));

        let e = BridgeError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: BridgeError = "something broke".into();
        assert!(matches!(e, BridgeError::Other(_)));
    }

    #[test]
    fn from_transport() {
        let e: BridgeError = TransportError::Stall.into();
        assert!(matches!(e, BridgeError::Transport(TransportError::Stall)));
        assert!(!TransportError::Stall.is_transient());
        assert!(TransportError::Transient("busy".into()).is_transient());
    }
}
