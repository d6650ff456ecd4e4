//! ARQ sliding-window transmit/receive state,
//! sequence-number arithmetic, and retransmit scheduling.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::pdu::PduHandle;

use super::primitives::MAX_WINDOW;

/// `true` if `a` is strictly "older" than `b` in the modular sequence space,
/// using the standard "at most half the space away is newer" convention.
pub fn seq_lt(a: u8, b: u8) -> bool {
    let forward = b.wrapping_sub(a);
    forward != 0 && forward <= 127
}

pub fn seq_distance(from: u8, to: u8) -> u8 {
    to.wrapping_sub(from)
}

#[derive(Debug, thiserror::Error)]
pub enum ArqError {
    #[error("transmit window full")]
    WindowFull,
}

/// The sender's view of one peer's ARQ state: which sequences are still
/// unacknowledged and awaiting retransmission.
pub struct TxWindow {
    lwe: u8,
    uwe: u8,
    slots: Vec<Option<PduHandle>>,
    retransmit_attempts: Vec<u8>,
}

impl Default for TxWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl TxWindow {
    pub fn new() -> Self {
        Self { lwe: 0, uwe: 0, slots: vec![None; 256], retransmit_attempts: vec![0; 256] }
    }

    pub fn lwe(&self) -> u8 {
        self.lwe
    }

    pub fn uwe(&self) -> u8 {
        self.uwe
    }

    pub fn occupancy(&self) -> u8 {
        seq_distance(self.lwe, self.uwe)
    }

    /// Reserve the next sequence number without yet attaching a PDU to it —
    /// lets a caller learn `seq` before encoding the frame that embeds it
    /// (the frame's bytes cannot exist until `seq` is known), then attach
    /// the encoded result with [`Self::place`].
    pub fn alloc_seq(&mut self) -> Result<u8, ArqError> {
        if self.occupancy() as u16 >= MAX_WINDOW as u16 {
            return Err(ArqError::WindowFull);
        }
        let seq = self.uwe;
        self.uwe = self.uwe.wrapping_add(1);
        Ok(seq)
    }

    /// Attach the encoded PDU to a sequence previously returned by
    /// [`Self::alloc_seq`].
    pub fn place(&mut self, seq: u8, pdu: PduHandle) {
        self.slots[seq as usize] = Some(pdu);
    }

    /// Allocate the next sequence number for a fresh outbound segment.
    pub fn alloc(&mut self, pdu: PduHandle) -> Result<u8, ArqError> {
        let seq = self.alloc_seq()?;
        self.place(seq, pdu);
        Ok(seq)
    }

    pub fn pdu_at(&self, seq: u8) -> Option<&PduHandle> {
        self.slots[seq as usize].as_ref()
    }

    pub fn retransmit_attempts(&self, seq: u8) -> u8 {
        self.retransmit_attempts[seq as usize]
    }

    pub fn note_retransmit(&mut self, seq: u8) {
        self.retransmit_attempts[seq as usize] = self.retransmit_attempts[seq as usize].saturating_add(1);
    }

    /// Release the slot for `seq` unconditionally (abandon-after-max-retries
    /// or a confirmed ACK).
    pub fn release(&mut self, seq: u8) -> Option<PduHandle> {
        let handle = self.slots[seq as usize].take();
        self.retransmit_attempts[seq as usize] = 0;
        handle
    }

    /// Apply an ACK D_PDU: release every sequence the
    /// bitmap marks received, then advance `lwe` past the longest
    /// contiguous run of released sequences starting at `new_lower_edge`.
    /// Returns the sequences released.
    pub fn apply_ack(&mut self, new_lower_edge: u8, bitmap: &[bool]) -> Vec<u8> {
        let mut released = Vec::new();
        for (i, &acked) in bitmap.iter().enumerate() {
            if !acked {
                continue;
            }
            let seq = new_lower_edge.wrapping_add(i as u8);
            if self.release(seq).is_some() {
                released.push(seq);
            }
        }
        while self.lwe != self.uwe && self.slots[self.lwe as usize].is_none() {
            self.lwe = self.lwe.wrapping_add(1);
        }
        released
    }
}

#[derive(Clone)]
struct PendingSegment {
    last: bool,
    payload: Vec<u8>,
}

/// The receiver's view: which sequences have arrived, and reassembly of
/// multi-segment C_PDUs delimited by first/last flags rather than an
/// explicit total size (unlike the Non-ARQ path).
pub struct RxWindow {
    lwe: u8,
    uwe: u8,
    received: Vec<bool>,
    segments: Vec<Option<PendingSegment>>,
    assembling: Vec<u8>,
}

impl Default for RxWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Segment stored; no C_PDU became complete yet.
    Stored,
    /// Already seen (retransmission or duplicate); discard.
    Duplicate,
    /// One or more complete C_PDUs are now deliverable, in order.
    Delivered(Vec<Vec<u8>>),
}

impl RxWindow {
    pub fn new() -> Self {
        Self {
            lwe: 0,
            uwe: 0,
            received: vec![false; 256],
            segments: vec![None; 256],
            assembling: Vec::new(),
        }
    }

    pub fn lwe(&self) -> u8 {
        self.lwe
    }

    pub fn receive(&mut self, seq: u8, first: bool, last: bool, payload: &[u8]) -> ReceiveOutcome {
        if seq_lt(seq, self.lwe) || self.received[seq as usize] {
            return ReceiveOutcome::Duplicate;
        }
        self.received[seq as usize] = true;
        self.segments[seq as usize] = Some(PendingSegment { last, payload: payload.to_vec() });
        if seq == self.uwe || seq_lt(self.uwe, seq) {
            self.uwe = seq.wrapping_add(1);
        }
        let _ = first;

        let mut delivered = Vec::new();
        while self.lwe != self.uwe && self.received[self.lwe as usize] {
            let seg = self.segments[self.lwe as usize].take().expect("received implies stored");
            self.received[self.lwe as usize] = false;
            self.assembling.extend_from_slice(&seg.payload);
            if seg.last {
                delivered.push(std::mem::take(&mut self.assembling));
            }
            self.lwe = self.lwe.wrapping_add(1);
        }

        if delivered.is_empty() {
            ReceiveOutcome::Stored
        } else {
            ReceiveOutcome::Delivered(delivered)
        }
    }

    /// ACK bitmap to send back: one bit per sequence in `[lwe, uwe)`.
    pub fn ack_bitmap(&self) -> Vec<bool> {
        let mut bits = Vec::new();
        let mut s = self.lwe;
        while s != self.uwe {
            bits.push(self.received[s as usize]);
            s = s.wrapping_add(1);
        }
        bits
    }
}

/// Per-peer retransmit deadlines backing an exponential-backoff schedule.
/// A min-heap keyed by deadline; the event loop's timer wait races against
/// whichever deadline is nearest.
pub struct RetransmitScheduler {
    heap: BinaryHeap<Reverse<(Instant, u8)>>,
    initial: Duration,
    max: Duration,
    max_attempts: u8,
}

impl RetransmitScheduler {
    pub fn new(initial: Duration, max: Duration, max_attempts: u8) -> Self {
        Self { heap: BinaryHeap::new(), initial, max, max_attempts }
    }

    pub fn arm(&mut self, seq: u8, now: Instant) {
        self.heap.push(Reverse((now + self.initial, seq)));
    }

    pub fn backoff(&self, attempts: u8) -> Duration {
        let factor = 1u32 << attempts.min(16);
        (self.initial * factor).min(self.max)
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop every sequence whose deadline has elapsed by `now`. The caller is
    /// responsible for checking whether the sequence is still outstanding
    /// (it may have been ACKed since the timer was armed) before acting.
    pub fn pop_due(&mut self, now: Instant) -> Vec<u8> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let Reverse((_, seq)) = self.heap.pop().expect("peeked");
            due.push(seq);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Pdu;

    fn handle() -> PduHandle {
        PduHandle::from_pdu(Pdu::new_request(16))
    }

    #[test]
    fn window_never_exceeds_max_before_ack() {
        let mut tx = TxWindow::new();
        for _ in 0..MAX_WINDOW {
            tx.alloc(handle()).unwrap();
        }
        assert!(matches!(tx.alloc(handle()), Err(ArqError::WindowFull)));
    }

    #[test]
    fn ack_releases_contiguous_prefix_and_advances_lwe() {
        let mut tx = TxWindow::new();
        for _ in 0..5 {
            tx.alloc(handle()).unwrap();
        }
        let released = tx.apply_ack(0, &[true, true, true, false, false]);
        assert_eq!(released, vec![0, 1, 2]);
        assert_eq!(tx.lwe(), 3);
    }

    #[test]
    fn rx_window_delivers_single_segment_c_pdus_out_of_order() {
        let mut rx = RxWindow::new();
        assert_eq!(rx.receive(1, true, true, b"two"), ReceiveOutcome::Stored);
        match rx.receive(0, true, true, b"one") {
            ReceiveOutcome::Delivered(v) => assert_eq!(v, vec![b"one".to_vec(), b"two".to_vec()]),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn rx_window_reassembles_multi_segment_c_pdu() {
        let mut rx = RxWindow::new();
        assert_eq!(rx.receive(0, true, false, b"AB"), ReceiveOutcome::Stored);
        assert_eq!(rx.receive(1, false, false, b"CD"), ReceiveOutcome::Stored);
        match rx.receive(2, false, true, b"EF") {
            ReceiveOutcome::Delivered(v) => assert_eq!(v, vec![b"ABCDEF".to_vec()]),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn retransmission_before_lwe_is_duplicate() {
        let mut rx = RxWindow::new();
        rx.receive(0, true, true, b"x");
        assert_eq!(rx.receive(0, true, true, b"x"), ReceiveOutcome::Duplicate);
    }

    #[test]
    fn scheduler_pops_only_elapsed_deadlines() {
        let mut sched = RetransmitScheduler::new(Duration::from_millis(10), Duration::from_secs(1), 8);
        let now = Instant::now();
        sched.arm(5, now);
        assert!(sched.pop_due(now).is_empty());
        assert_eq!(sched.pop_due(now + Duration::from_millis(11)), vec![5]);
    }
}
