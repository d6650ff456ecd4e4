//! Per-peer DTS connection state machine.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::address::Address;

use super::arq::{ArqError, ReceiveOutcome, RetransmitScheduler, RxWindow, TxWindow};
use super::nonarq::NonArqTable;
use super::primitives::{self, d_type, Frame, TypeSpecific, MAX_SEGMENT};
use crate::pdu::{Pdu, PduHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLifecycle {
    Idle,
    Connected,
    ResetPending,
    Closing,
}

pub enum DtsAction {
    /// A reassembled C_PDU ready for the SIS↔DTS bridge to deliver.
    Deliver { src: Address, dst: Address, payload: Vec<u8> },
    /// A D_PDU to enqueue on this peer's write queue.
    Transmit(Vec<u8>),
}

pub struct PeerState {
    pub lifecycle: PeerLifecycle,
    pub tx: TxWindow,
    pub rx: RxWindow,
    pub nonarq: NonArqTable,
    pub scheduler: RetransmitScheduler,
    local_addr: Address,
}

impl PeerState {
    pub fn new(
        local_addr: Address,
        retransmit_initial: Duration,
        retransmit_max: Duration,
        max_retransmits: u8,
    ) -> Self {
        Self {
            lifecycle: PeerLifecycle::Idle,
            tx: TxWindow::new(),
            rx: RxWindow::new(),
            nonarq: NonArqTable::new(),
            scheduler: RetransmitScheduler::new(retransmit_initial, retransmit_max, max_retransmits),
            local_addr,
        }
    }

    /// Apply one fully-parsed, CRC-verified frame; any D_PDU 6/15
    /// management or warning traffic is logged only.
    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> Vec<DtsAction> {
        if self.lifecycle == PeerLifecycle::Idle {
            self.lifecycle = PeerLifecycle::Connected;
        }

        match frame.fields {
            TypeSpecific::NonArq(f) => self.on_nonarq(frame.src, frame.dst, f, &frame.payload),
            TypeSpecific::Data(d) => self.on_data(frame.src, frame.dst, d, &frame.payload, now),
            TypeSpecific::Ack(a) => {
                self.tx.apply_ack(a.new_lower_edge, &a.bitmap);
                Vec::new()
            }
            TypeSpecific::DataAck(d, a) => {
                let actions = self.on_data(frame.src, frame.dst, d, &frame.payload, now);
                self.tx.apply_ack(a.new_lower_edge, &a.bitmap);
                actions
            }
            TypeSpecific::Reset { reason } => self.on_reset(frame.src, frame.dst, reason),
            TypeSpecific::Management { opcode } => {
                debug!(opcode, "dts management pdu received");
                Vec::new()
            }
            TypeSpecific::Warning => {
                warn!(len = frame.payload.len(), "dts warning pdu received");
                Vec::new()
            }
        }
    }

    fn on_nonarq(
        &mut self,
        src: Address,
        dst: Address,
        f: super::primitives::NonArqFields,
        payload: &[u8],
    ) -> Vec<DtsAction> {
        match self.nonarq.place_segment(f.c_pdu_id, f.total_size, f.offset, payload) {
            Ok(Some(complete)) => vec![DtsAction::Deliver { src, dst, payload: complete }],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, c_pdu_id = f.c_pdu_id, "non-arq reassembly rejected segment");
                Vec::new()
            }
        }
    }

    fn on_data(
        &mut self,
        src: Address,
        dst: Address,
        d: super::primitives::DataFields,
        payload: &[u8],
        now: Instant,
    ) -> Vec<DtsAction> {
        let outcome = self.rx.receive(d.seq, d.first, d.last, payload);
        let mut actions = Vec::new();
        if let ReceiveOutcome::Delivered(c_pdus) = outcome {
            for c_pdu in c_pdus {
                actions.push(DtsAction::Deliver { src: src.clone(), dst: dst.clone(), payload: c_pdu });
            }
        }
        let _ = now;
        let ack_frame = self.build_ack_frame(&dst, &src);
        actions.push(DtsAction::Transmit(ack_frame));
        actions
    }

    fn on_reset(&mut self, src: Address, dst: Address, reason: u8) -> Vec<DtsAction> {
        debug!(reason, "dts reset/win_resync received");
        self.lifecycle = PeerLifecycle::ResetPending;
        self.tx = TxWindow::new();
        self.rx = RxWindow::new();
        let ack = primitives::build_frame(d_type::RESET, 0, 0, &dst, &src, &[reason], &[]);
        self.lifecycle = PeerLifecycle::Connected;
        vec![DtsAction::Transmit(ack)]
    }

    fn build_ack_frame(&self, local: &Address, peer: &Address) -> Vec<u8> {
        let bitmap = self.rx.ack_bitmap();
        let bitmap_bytes = primitives::bitmap_to_bytes(&bitmap);
        let mut control = Vec::with_capacity(2 + bitmap_bytes.len());
        control.push(self.rx.lwe());
        control.push(bitmap_bytes.len() as u8);
        control.extend_from_slice(&bitmap_bytes);
        primitives::build_frame(d_type::ACK_ONLY, 0, 0, local, peer, &control, &[])
    }

    /// Segment and window-allocate a C_PDU for ARQ transmission to `peer`.
    /// Returns the encoded D_PDUs to enqueue, in order; arms a retransmit
    /// deadline for each. Fails with
    /// `WindowFull` (and allocates nothing) if the whole C_PDU would not
    /// fit in the remaining transmit window.
    pub fn transmit_arq(
        &mut self,
        c_pdu: &[u8],
        peer: &Address,
        now: Instant,
    ) -> Result<Vec<Vec<u8>>, ArqError> {
        let chunks: Vec<&[u8]> = if c_pdu.is_empty() { vec![&[]] } else { c_pdu.chunks(MAX_SEGMENT).collect() };
        if chunks.len() as u16 > crate::dts::primitives::MAX_WINDOW - self.tx.occupancy() as u16 {
            return Err(ArqError::WindowFull);
        }

        let mut frames = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let first = i == 0;
            let last = i == chunks.len() - 1;
            let seq = self.tx.alloc_seq()?;
            let segment_flags = match (first, last) {
                (true, true) => 0xC0,
                (true, false) => 0x80,
                (false, true) => 0x40,
                (false, false) => 0x00,
            };
            let offset = (i * MAX_SEGMENT) as u16;
            let control = vec![seq, 0u8, segment_flags, (offset >> 8) as u8, (offset & 0xFF) as u8];
            let wire = primitives::build_frame(d_type::DATA_ONLY, 0, 0, &self.local_addr, peer, &control, chunk);
            let handle = PduHandle::from_pdu(Pdu::new_request(wire.len()));
            {
                let mut pdu = handle.lock();
                pdu.spare_capacity(wire.len()).copy_from_slice(&wire);
                pdu.commit(wire.len());
            }
            self.tx.place(seq, handle);
            self.scheduler.arm(seq, now);
            frames.push(wire);
        }
        Ok(frames)
    }

    /// Sequences whose retransmit deadline has elapsed and which are still
    /// outstanding (not yet ACKed). Re-arms a fresh deadline for each one
    /// returned, or abandons the slot after `max_attempts`.
    pub fn due_retransmits(&mut self, peer: &Address, now: Instant) -> Vec<Vec<u8>> {
        let due = self.scheduler.pop_due(now);
        let mut out = Vec::new();
        for seq in due {
            let Some(handle) = self.tx.pdu_at(seq).cloned() else {
                continue; // already ACKed; timer fired after release
            };
            let attempts = self.tx.retransmit_attempts(seq);
            if attempts >= self.scheduler.max_attempts() {
                warn!(seq, attempts, "dts arq giving up after max retransmits");
                self.tx.release(seq);
                continue;
            }
            self.tx.note_retransmit(seq);
            self.scheduler.arm(seq, now);
            let _ = peer;
            out.push(handle.lock().filled().to_vec());
        }
        out
    }

    pub fn close(&mut self) {
        self.lifecycle = PeerLifecycle::Closing;
    }

    pub fn local_addr(&self) -> &Address {
        &self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_state() -> PeerState {
        PeerState::new(
            Address::new(vec![1]).unwrap(),
            Duration::from_millis(10),
            Duration::from_secs(1),
            8,
        )
    }

    #[test]
    fn transmit_arq_segments_and_windows_a_c_pdu() {
        let mut state = peer_state();
        let peer = Address::new(vec![2]).unwrap();
        let c_pdu = vec![0xAB; 1700];
        let frames = state.transmit_arq(&c_pdu, &peer, Instant::now()).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(state.tx.occupancy(), 3);
    }

    #[test]
    fn due_retransmits_only_returns_unacked_elapsed_segments() {
        let mut state = peer_state();
        let peer = Address::new(vec![2]).unwrap();
        let start = Instant::now();
        state.transmit_arq(&[0xAB; 10], &peer, start).unwrap();
        assert!(state.due_retransmits(&peer, start).is_empty());

        let later = start + Duration::from_millis(11);
        let due = state.due_retransmits(&peer, later);
        assert_eq!(due.len(), 1);
        assert_eq!(state.tx.retransmit_attempts(0), 1);
    }

    #[test]
    fn acked_segment_is_not_retransmitted() {
        let mut state = peer_state();
        let peer = Address::new(vec![2]).unwrap();
        let start = Instant::now();
        state.transmit_arq(&[0xAB; 10], &peer, start).unwrap();
        state.tx.apply_ack(0, &[true]);

        let later = start + Duration::from_millis(11);
        assert!(state.due_retransmits(&peer, later).is_empty());
    }
}
