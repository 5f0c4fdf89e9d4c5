//! Stream lifecycle phase.

use std::time::{Duration, Instant};

use crate::error::BridgeError;

/// Whether the engine is streaming.
///
/// ```text
///  Disabled ──enable()──► Enabled
///     ▲                      │
///     └──────disable()───────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamPhase {
    /// No pool, no worker. Initial state.
    #[default]
    Disabled,

    /// Pool allocated and worker running.
    Enabled {
        /// When streaming started.
        since: Instant,
    },
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::Enabled { .. } => write!(f, "Enabled"),
        }
    }
}

impl StreamPhase {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Time spent streaming, `None` while disabled.
    pub fn enabled_duration(&self) -> Option<Duration> {
        match self {
            Self::Enabled { since } => Some(since.elapsed()),
            Self::Disabled => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disabled`.
    pub fn enable(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Disabled => {
                *self = Self::Enabled {
                    since: Instant::now(),
                };
                Ok(())
            }
            Self::Enabled { .. } => Err(BridgeError::InvalidState("stream already enabled")),
        }
    }

    /// Valid from any phase; disabling twice is a no-op.
    pub fn disable(&mut self) {
        *self = Self::Disabled;
    }

    /// Guard for operations that need a stopped stream.
    pub fn require_disabled(&self, what: &'static str) -> Result<(), BridgeError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Enabled { .. } => Err(BridgeError::InvalidState(what)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut phase = StreamPhase::default();
        assert!(!phase.is_enabled());
        assert!(phase.enabled_duration().is_none());

        phase.enable().unwrap();
        assert!(phase.is_enabled());
        assert!(phase.enabled_duration().is_some());
        assert_eq!(phase.to_string(), "Enabled");

        phase.disable();
        phase.disable();
        assert_eq!(phase, StreamPhase::Disabled);
    }

    #[test]
    fn double_enable_rejected() {
        let mut phase = StreamPhase::default();
        phase.enable().unwrap();
        assert!(matches!(phase.enable(), Err(BridgeError::InvalidState(_))));
    }

    #[test]
    fn require_disabled_guard() {
        let mut phase = StreamPhase::default();
        assert!(phase.require_disabled("configure").is_ok());
        phase.enable().unwrap();
        assert!(matches!(
            phase.require_disabled("cannot configure while enabled"),
            Err(BridgeError::InvalidState(_))
        ));
    }
}
