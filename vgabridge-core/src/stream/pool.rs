//! Fixed pool of transfer buffers.
//!
//! Every buffer lives in exactly one of three logical lists:
//!
//! ```text
//!            stage()              next_to_send()
//!   Free ─────────────► Queued ───────────────────► InFlight
//!    ▲                                                  │
//!    └──────────── release() when in_flight hits 0 ─────┘
//! ```
//!
//! A buffer that is already in flight may be picked again by
//! [`BufferPool::next_to_send`] (repeat-last-frame); it then carries more
//! than one outstanding submission and only returns to `Free` once all of
//! them have completed.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::BridgeError;

/// Buffers per pool: the minimum pipeline depth plus one spare.
pub const POOL_SIZE: usize = 4;

/// Transfers kept outstanding in steady state.
pub const MIN_PIPELINE_DEPTH: usize = 3;

// ── Buffer identity & state ──────────────────────────────────────

/// Index of a buffer within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Which list a buffer currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    Free,
    Queued,
    InFlight,
}

/// One pool slot.
#[derive(Debug)]
pub struct TransferBuffer {
    pub id: BufferId,
    pub state: BufferState,
    /// Outstanding transport submissions referencing this buffer.
    pub in_flight: u32,
    /// Packed frame bytes; its length is the buffer size.
    pub data: Bytes,
}

impl TransferBuffer {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Why [`BufferPool::next_to_send`] picked a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Freshly packed frame.
    Queued,
    /// Resend of the newest frame still on the wire.
    RepeatInFlight,
    /// Resend of the most recently completed frame.
    RepeatFree,
}

impl Selection {
    pub fn is_repeat(self) -> bool {
        !matches!(self, Selection::Queued)
    }
}

/// A buffer chosen for submission.
#[derive(Debug, Clone)]
pub struct Selected {
    pub id: BufferId,
    pub data: Bytes,
    pub selection: Selection,
}

/// List lengths at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    pub free: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub total: usize,
}

impl PoolSnapshot {
    /// Whether every buffer is back in the Free list.
    pub fn all_free(&self) -> bool {
        self.free == self.total && self.queued == 0 && self.in_flight == 0
    }
}

// ── BufferPool ───────────────────────────────────────────────────

/// The three buffer lists plus the buffers themselves.
///
/// Not synchronized; the stream engine keeps it behind one lock.
#[derive(Debug)]
pub struct BufferPool {
    epoch: u64,
    buffer_size: usize,
    buffers: Vec<TransferBuffer>,
    free: VecDeque<BufferId>,
    queued: VecDeque<BufferId>,
    in_flight: VecDeque<BufferId>,
}

impl BufferPool {
    /// Allocate `count` zeroed buffers of `buffer_size` bytes.
    ///
    /// On failure nothing is kept: buffers allocated so far are dropped
    /// and [`BridgeError::OutOfMemory`] is returned.
    pub fn allocate(count: usize, buffer_size: usize, epoch: u64) -> Result<Self, BridgeError> {
        let mut buffers = Vec::new();
        buffers
            .try_reserve_exact(count)
            .map_err(|_| BridgeError::OutOfMemory {
                requested: count * std::mem::size_of::<TransferBuffer>(),
            })?;

        for i in 0..count {
            let data = zeroed(buffer_size)?;
            buffers.push(TransferBuffer {
                id: BufferId(i),
                state: BufferState::Free,
                in_flight: 0,
                data,
            });
        }

        let pool = Self {
            epoch,
            buffer_size,
            free: (0..count).map(BufferId).collect(),
            queued: VecDeque::with_capacity(count),
            in_flight: VecDeque::with_capacity(count),
            buffers,
        };
        debug_assert!(pool.check_invariants().is_ok());
        Ok(pool)
    }

    /// Generation tag; completions carrying another epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&TransferBuffer> {
        self.buffers.get(id.0)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Producer side: adopt `packed` as the Free head's contents and move
    /// that buffer to the Queued tail.
    ///
    /// Returns the storage the buffer held before, for reuse as the next
    /// staging region. When no buffer is free the frame is dropped and
    /// `packed` is handed back.
    pub fn stage(&mut self, packed: Bytes) -> Result<Bytes, Bytes> {
        let Some(&id) = self.free.front() else {
            return Err(packed);
        };
        let buffer = &mut self.buffers[id.0];
        let retired = std::mem::replace(&mut buffer.data, packed);
        self.move_to(id, BufferState::Queued);
        debug_assert!(self.check_invariants().is_ok());
        Ok(retired)
    }

    /// Consumer side: pick the next buffer to put on the wire.
    ///
    /// Priority: Queued head, else newest InFlight, else newest Free. The
    /// chosen buffer gains one in-flight reference and moves to the
    /// InFlight tail.
    pub fn next_to_send(&mut self) -> Option<Selected> {
        let (id, selection) = if let Some(&id) = self.queued.front() {
            (id, Selection::Queued)
        } else if let Some(&id) = self.in_flight.back() {
            (id, Selection::RepeatInFlight)
        } else if let Some(&id) = self.free.back() {
            (id, Selection::RepeatFree)
        } else {
            return None;
        };

        self.buffers[id.0].in_flight += 1;
        self.move_to(id, BufferState::InFlight);
        debug_assert!(self.check_invariants().is_ok());

        Some(Selected {
            id,
            data: self.buffers[id.0].data.clone(),
            selection,
        })
    }

    /// Completion side: drop one in-flight reference.
    ///
    /// Returns `true` when the buffer went back to Free. References that
    /// do not exist (already drained) are ignored.
    pub fn release(&mut self, id: BufferId) -> bool {
        let Some(buffer) = self.buffers.get_mut(id.0) else {
            return false;
        };
        if buffer.state != BufferState::InFlight || buffer.in_flight == 0 {
            return false;
        }
        buffer.in_flight -= 1;
        let freed = buffer.in_flight == 0;
        if freed {
            self.move_to(id, BufferState::Free);
        }
        debug_assert!(self.check_invariants().is_ok());
        freed
    }

    /// Force every buffer back to Free, discarding in-flight references.
    ///
    /// Returns how many buffers were moved.
    pub fn drain(&mut self) -> usize {
        let mut moved = 0;
        while let Some(id) = self.queued.front().copied().or_else(|| self.in_flight.front().copied()) {
            self.buffers[id.0].in_flight = 0;
            self.move_to(id, BufferState::Free);
            moved += 1;
        }
        debug_assert!(self.check_invariants().is_ok());
        moved
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            free: self.free.len(),
            queued: self.queued.len(),
            in_flight: self.in_flight.len(),
            total: self.buffers.len(),
        }
    }

    /// Verify list membership and reference counts.
    pub fn check_invariants(&self) -> Result<(), String> {
        let n = self.buffers.len();
        let listed = self.free.len() + self.queued.len() + self.in_flight.len();
        if listed != n {
            return Err(format!("{listed} buffers listed, pool holds {n}"));
        }

        let mut seen = vec![false; n];
        let lists = [
            (BufferState::Free, &self.free),
            (BufferState::Queued, &self.queued),
            (BufferState::InFlight, &self.in_flight),
        ];
        for (state, list) in lists {
            for &id in list {
                let Some(buffer) = self.buffers.get(id.0) else {
                    return Err(format!("{id} out of range"));
                };
                if std::mem::replace(&mut seen[id.0], true) {
                    return Err(format!("{id} listed twice"));
                }
                if buffer.state != state {
                    return Err(format!("{id} tagged {:?} in {state:?} list", buffer.state));
                }
                let refs_ok = match state {
                    BufferState::InFlight => buffer.in_flight >= 1,
                    BufferState::Free | BufferState::Queued => buffer.in_flight == 0,
                };
                if !refs_ok {
                    return Err(format!("{id} in {state:?} with in_flight {}", buffer.in_flight));
                }
            }
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────

    /// Unlink `id` from its current list and append it to `state`'s list.
    fn move_to(&mut self, id: BufferId, state: BufferState) {
        let from = self.buffers[id.0].state;
        let source = self.list_mut(from);
        if let Some(pos) = source.iter().position(|&b| b == id) {
            source.remove(pos);
        }
        self.list_mut(state).push_back(id);
        self.buffers[id.0].state = state;
    }

    fn list_mut(&mut self, state: BufferState) -> &mut VecDeque<BufferId> {
        match state {
            BufferState::Free => &mut self.free,
            BufferState::Queued => &mut self.queued,
            BufferState::InFlight => &mut self.in_flight,
        }
    }
}

/// A zero-filled region of `size` bytes, failing softly on exhaustion.
pub(crate) fn zeroed(size: usize) -> Result<Bytes, BridgeError> {
    let mut v: Vec<u8> = Vec::new();
    v.try_reserve_exact(size)
        .map_err(|_| BridgeError::OutOfMemory { requested: size })?;
    v.resize(size, 0);
    Ok(Bytes::from(v))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BufferPool {
        BufferPool::allocate(POOL_SIZE, 16, 1).unwrap()
    }

    fn frame(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 16])
    }

    #[test]
    fn fresh_pool_all_free() {
        let p = pool();
        assert_eq!(
            p.snapshot(),
            PoolSnapshot {
                free: 4,
                queued: 0,
                in_flight: 0,
                total: 4
            }
        );
        assert!(p.check_invariants().is_ok());
        assert_eq!(p.buffer(BufferId(0)).unwrap().size(), 16);
    }

    #[test]
    fn stage_moves_free_head_to_queued_tail() {
        let mut p = pool();
        let retired = p.stage(frame(0xAA)).unwrap();
        assert_eq!(retired.len(), 16);
        assert_eq!(p.snapshot().queued, 1);
        assert_eq!(p.buffer(BufferId(0)).unwrap().state, BufferState::Queued);
        assert_eq!(p.buffer(BufferId(0)).unwrap().data[0], 0xAA);
    }

    #[test]
    fn stage_drops_when_no_free_buffer() {
        let mut p = pool();
        for i in 0..POOL_SIZE {
            assert!(p.stage(frame(i as u8)).is_ok());
        }
        let back = p.stage(frame(9)).unwrap_err();
        assert_eq!(back[0], 9);
        assert_eq!(p.snapshot().queued, POOL_SIZE);
    }

    #[test]
    fn queued_frames_sent_in_order() {
        let mut p = pool();
        p.stage(frame(1)).unwrap();
        p.stage(frame(2)).unwrap();
        let a = p.next_to_send().unwrap();
        let b = p.next_to_send().unwrap();
        assert_eq!((a.id, a.selection), (BufferId(0), Selection::Queued));
        assert_eq!((b.id, b.selection), (BufferId(1), Selection::Queued));
        assert_eq!(a.data[0], 1);
        assert_eq!(b.data[0], 2);
    }

    #[test]
    fn repeats_newest_in_flight_then_newest_free() {
        let mut p = pool();
        p.stage(frame(1)).unwrap();
        p.stage(frame(2)).unwrap();
        p.next_to_send().unwrap();
        p.next_to_send().unwrap();

        let again = p.next_to_send().unwrap();
        assert_eq!(again.selection, Selection::RepeatInFlight);
        assert_eq!(again.id, BufferId(1));
        assert_eq!(p.buffer(BufferId(1)).unwrap().in_flight, 2);

        // Completing all references returns both buffers to Free.
        assert!(p.release(BufferId(0)));
        assert!(!p.release(BufferId(1)));
        assert!(p.release(BufferId(1)));
        assert_eq!(p.snapshot().free, 4);

        // Newest Free is the last one released.
        let repeat = p.next_to_send().unwrap();
        assert_eq!(repeat.selection, Selection::RepeatFree);
        assert_eq!(repeat.id, BufferId(1));
        assert_eq!(repeat.data[0], 2);
    }

    #[test]
    fn fresh_pool_sends_free_tail() {
        let mut p = pool();
        let s = p.next_to_send().unwrap();
        assert_eq!(s.selection, Selection::RepeatFree);
        assert_eq!(s.id, BufferId(3));
        assert!(s.selection.is_repeat());
    }

    #[test]
    fn in_flight_buffer_never_restaged() {
        let mut p = pool();
        for _ in 0..POOL_SIZE {
            p.next_to_send().unwrap();
        }
        assert!(!p.has_free());
        assert!(p.stage(frame(7)).is_err());
        assert!(p.check_invariants().is_ok());
    }

    #[test]
    fn release_ignores_unknown_refs() {
        let mut p = pool();
        assert!(!p.release(BufferId(0)));
        assert!(!p.release(BufferId(99)));
        assert!(p.check_invariants().is_ok());
    }

    #[test]
    fn drain_returns_everything_to_free() {
        let mut p = pool();
        p.stage(frame(1)).unwrap();
        p.stage(frame(2)).unwrap();
        p.next_to_send().unwrap();
        p.next_to_send().unwrap();
        p.stage(frame(3)).unwrap();

        assert_eq!(p.drain(), 3);
        assert!(p.snapshot().all_free());
        assert!(p.check_invariants().is_ok());
        assert!(!p.release(BufferId(0)));
    }

    #[test]
    fn invariant_checker_catches_bad_tag() {
        let mut p = pool();
        p.buffers[2].state = BufferState::Queued;
        assert!(p.check_invariants().is_err());
    }

    #[test]
    fn invariant_checker_catches_stray_reference() {
        let mut p = pool();
        p.buffers[0].in_flight = 1;
        assert!(p.check_invariants().is_err());
    }

    #[test]
    fn absurd_allocation_fails_softly() {
        let err = BufferPool::allocate(POOL_SIZE, usize::MAX, 0).unwrap_err();
        assert!(matches!(err, BridgeError::OutOfMemory { .. }));
    }
}
