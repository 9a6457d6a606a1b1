//! Per-session diff queue with bounded retention and resume-by-sequence.

use std::collections::VecDeque;
use std::time::Instant;

use crate::protocol::messages::BufferDelta;
use crate::protocol::SessionId;

use super::SessionError;

/// Number of diffs retained for a detached client before the oldest are
/// dropped. Zero disables the cap.
pub const DEFAULT_MAX_DIFFS: usize = 4096;

/// A diff with its assigned sequence number and the payload encoded once at
/// enqueue time, so replays and flushes never re-serialize.
#[derive(Debug, Clone)]
pub struct DiffPacket {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// Retention counters surfaced through `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Diffs dropped from the head under the retention cap.
    pub dropped: u64,
    /// Highest sequence number among dropped diffs. A client whose ack
    /// cursor is at or below this must re-bootstrap from a snapshot.
    pub last_dropped_seq: u64,
}

/// The authoritative per-client replication state. All fields are guarded
/// by the mutex the registry wraps around each session; methods take
/// `&mut self` and never block on anything else.
pub struct Session {
    id: SessionId,
    next_sequence: u64,
    pending: VecDeque<DiffPacket>,
    max_diffs: usize,
    stats: SessionStats,
    closed: bool,
    last_snapshot_time: Option<Instant>,
}

impl Session {
    pub fn new(id: SessionId, max_diffs: usize) -> Self {
        Self {
            id,
            next_sequence: 0,
            pending: VecDeque::new(),
            max_diffs,
            stats: SessionStats::default(),
            closed: false,
            last_snapshot_time: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encode `delta`, assign it the next sequence number and append it to
    /// the queue, trimming the head if the retention cap is exceeded.
    pub fn enqueue_diff(&mut self, delta: &BufferDelta) -> Result<u64, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let sequence = self.next_sequence + 1;
        let mut payload = Vec::new();
        crate::protocol::Message::BufferDelta(delta.clone()).encode_payload(&mut payload);
        self.pending.push_back(DiffPacket { sequence, payload });
        self.next_sequence = sequence;
        self.enforce_cap();
        Ok(sequence)
    }

    /// Drop every packet the client has confirmed. `ack(0)` is a no-op.
    pub fn ack(&mut self, sequence: u64) {
        while let Some(head) = self.pending.front() {
            if head.sequence <= sequence {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Packets with sequence strictly greater than `after`, in order. The
    /// returned copies are the caller's; the queue is not mutated.
    pub fn pending(&self, after: u64) -> Vec<DiffPacket> {
        self.pending
            .iter()
            .filter(|p| p.sequence > after)
            .cloned()
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Update the retention cap. A smaller cap drops from the head eagerly.
    pub fn set_retention(&mut self, limit: usize) {
        self.max_diffs = limit;
        self.enforce_cap();
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Record that a full tree snapshot was emitted for this session.
    pub fn mark_snapshot(&mut self) {
        self.last_snapshot_time = Some(Instant::now());
    }

    pub fn last_snapshot_time(&self) -> Option<Instant> {
        self.last_snapshot_time
    }

    /// Close the session: empty the queue and reject further enqueues.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    fn enforce_cap(&mut self) {
        if self.max_diffs == 0 {
            return;
        }
        while self.pending.len() > self.max_diffs {
            if let Some(dropped) = self.pending.pop_front() {
                self.stats.dropped += 1;
                self.stats.last_dropped_seq = self.stats.last_dropped_seq.max(dropped.sequence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn delta(revision: u32) -> BufferDelta {
        BufferDelta {
            pane_id: Uuid::nil(),
            revision,
            flags: 0,
            styles: vec![],
            rows: vec![],
        }
    }

    fn session(max_diffs: usize) -> Session {
        Session::new(Uuid::new_v4(), max_diffs)
    }

    #[test]
    fn sequences_start_at_one_and_strictly_increase() {
        let mut s = session(0);
        for rev in 1..=5 {
            s.enqueue_diff(&delta(rev)).unwrap();
        }
        let pending = s.pending(0);
        assert_eq!(pending.len(), 5);
        for (i, packet) in pending.iter().enumerate() {
            assert_eq!(packet.sequence, i as u64 + 1);
        }
    }

    #[test]
    fn pending_after_ack_excludes_acked_sequences() {
        let mut s = session(0);
        for rev in 1..=5 {
            s.enqueue_diff(&delta(rev)).unwrap();
        }
        s.ack(3);
        let pending = s.pending(3);
        assert_eq!(
            pending.iter().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
        // A later cursor never resurfaces earlier packets.
        assert!(s.pending(5).is_empty());
    }

    #[test]
    fn ack_zero_is_a_no_op() {
        let mut s = session(0);
        s.enqueue_diff(&delta(1)).unwrap();
        s.ack(0);
        assert_eq!(s.pending_len(), 1);
    }

    #[test]
    fn retention_cap_drops_oldest_and_counts_them() {
        let mut s = session(2);
        for rev in 1..=3 {
            s.enqueue_diff(&delta(rev)).unwrap();
        }
        let pending = s.pending(0);
        assert_eq!(
            pending.iter().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(
            s.stats(),
            SessionStats {
                dropped: 1,
                last_dropped_seq: 1
            }
        );
    }

    #[test]
    fn retention_holds_exactly_n_after_many_enqueues() {
        let n = 4usize;
        let k = 7u64;
        let mut s = session(n);
        for rev in 0..(n as u64 + k) {
            s.enqueue_diff(&delta(rev as u32)).unwrap();
        }
        assert_eq!(s.pending(0).len(), n);
        assert_eq!(s.stats().dropped, k);
        assert_eq!(s.stats().last_dropped_seq, k);
    }

    #[test]
    fn shrinking_the_cap_drops_eagerly() {
        let mut s = session(0);
        for rev in 1..=6 {
            s.enqueue_diff(&delta(rev)).unwrap();
        }
        s.set_retention(2);
        assert_eq!(
            s.pending(0).iter().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![5, 6]
        );
        assert_eq!(s.stats().dropped, 4);
        assert_eq!(s.stats().last_dropped_seq, 4);
    }

    #[test]
    fn close_empties_queue_and_rejects_enqueue() {
        let mut s = session(0);
        s.enqueue_diff(&delta(1)).unwrap();
        s.close();
        assert!(s.is_closed());
        assert!(s.pending(0).is_empty());
        assert_eq!(s.enqueue_diff(&delta(2)), Err(SessionError::Closed));
    }

    #[test]
    fn empty_delta_still_bumps_the_sequence() {
        let mut s = session(0);
        let seq = s.enqueue_diff(&delta(1)).unwrap();
        assert_eq!(seq, 1);
        let seq = s.enqueue_diff(&delta(2)).unwrap();
        assert_eq!(seq, 2);
    }
}
