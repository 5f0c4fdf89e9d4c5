//! Bulk transport contract.
//!
//! The stream engine does not talk to USB itself. It hands each
//! [`Transfer`] to a [`BulkTransport`] together with a [`Completion`]
//! callback and learns the outcome only through that callback.
//!
//! ## Completion contract
//!
//! - The completion is invoked **exactly once** per accepted submission,
//!   possibly before `submit` has returned.
//! - It may run on a transport-owned context that must not block: the
//!   engine performs only O(1) bookkeeping and message sends in it.
//! - A transfer killed through [`BulkTransport::cancel`] completes with
//!   [`TransportError::Cancelled`].
//! - When `submit` returns `Err`, the completion is dropped uncalled.

use std::fmt;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;

use crate::error::TransportError;

// ── TransferId ───────────────────────────────────────────────────

/// Identity of one submission, unique for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── TransferFlags ────────────────────────────────────────────────

bitflags! {
    /// Per-transfer submission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransferFlags: u32 {
        /// Terminate the transfer with a zero-length packet when the
        /// payload is an exact multiple of the maximum packet size.
        const ZERO_PACKET = 0x1;
    }
}

// ── Transfer ─────────────────────────────────────────────────────

/// One bulk OUT submission.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    /// Bytes to send. Empty for an end-of-transfer marker.
    pub payload: Bytes,
    pub flags: TransferFlags,
}

impl Transfer {
    /// A data transfer for a packed frame buffer.
    pub fn data(id: TransferId, payload: Bytes, max_packet_size: usize) -> Self {
        let mut flags = TransferFlags::empty();
        if max_packet_size > 0 && payload.len() % max_packet_size == 0 {
            flags |= TransferFlags::ZERO_PACKET;
        }
        Self { id, payload, flags }
    }

    /// An explicit zero-length transfer.
    pub fn zero_length(id: TransferId) -> Self {
        Self {
            id,
            payload: Bytes::new(),
            flags: TransferFlags::empty(),
        }
    }

    /// Whether this is an end-of-transfer marker.
    pub fn is_zero_length(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Whether a payload of `len` bytes ends on a short packet and so needs an
/// explicit zero-length follow-up.
pub fn needs_zero_length_followup(len: usize, max_packet_size: usize) -> bool {
    max_packet_size > 0 && len % max_packet_size != 0
}

// ── Completion ───────────────────────────────────────────────────

/// Outcome of a finished transfer.
pub type TransferStatus = Result<(), TransportError>;

/// Callback invoked once when a transfer finishes.
pub type Completion = Box<dyn FnOnce(TransferStatus) + Send + 'static>;

// ── BulkTransport ────────────────────────────────────────────────

/// The bulk OUT endpoint frames are streamed to.
#[async_trait]
pub trait BulkTransport: Send + Sync + 'static {
    /// Largest packet the endpoint accepts, bytes.
    fn max_packet_size(&self) -> usize;

    /// Queue `transfer`; `done` fires when it finishes.
    ///
    /// [`TransportError::Transient`] means nothing was queued and the
    /// submission may be retried.
    async fn submit(&self, transfer: Transfer, done: Completion) -> Result<(), TransportError>;

    /// Request that an outstanding transfer be killed.
    ///
    /// Unknown or already finished ids are ignored.
    fn cancel(&self, id: TransferId);

    /// Clear a halt condition on the endpoint.
    async fn clear_stall(&self) -> Result<(), TransportError>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_transfer_flags() {
        let full = Transfer::data(TransferId(1), Bytes::from(vec![0u8; 1024]), 512);
        assert!(full.flags.contains(TransferFlags::ZERO_PACKET));

        let short = Transfer::data(TransferId(2), Bytes::from(vec![0u8; 1000]), 512);
        assert!(short.flags.is_empty());
    }

    #[test]
    fn zero_length_followup_rule() {
        assert!(needs_zero_length_followup(1000, 512));
        assert!(!needs_zero_length_followup(1024, 512));
        assert!(!needs_zero_length_followup(1000, 0));
    }

    #[test]
    fn zero_length_marker() {
        let t = Transfer::zero_length(TransferId(9));
        assert!(t.is_zero_length());
        assert_eq!(t.id.to_string(), "#9");
    }
}
