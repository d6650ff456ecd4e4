//! The read engine: a protocol-agnostic, "need"-driven
//! decode loop sitting between a socket and a registered decoder.
//!
//! Freshly read bytes are committed into the connection's current PDU; the
//! decoder is consulted after every commit. A PDU that turns out to be
//! shorter than the bytes already buffered (the next PDU's header rode in on
//! the same read) has its surplus split into a fresh PDU via
//! [`crate::pdu::Pdu::split_overflow`], so one `on_read` call can drain
//! several complete PDUs from a single chunk.

use crate::decode::DecodeOutcome;
use crate::pdu::{Need, PduHandle};
use crate::pool::Pool;

/// One fully-formed outcome produced while draining a chunk of freshly read
/// bytes. A single socket read can complete zero, one, or several PDUs.
#[derive(Debug)]
pub enum ReadAction<E> {
    /// A PDU was fully decoded and carries an application-level event.
    Dispatched(E),
    /// A PDU was fully decoded but was self-contained control traffic with
    /// nothing further to act on (e.g. a bare ACK).
    Consumed,
    /// A validation failure: logged and dropped, the connection
    /// survives.
    Discarded(&'static str),
    /// A framing failure fatal to this connection: the caller
    /// must close the socket after draining the remaining outcomes.
    Closed(&'static str),
}

/// Per-connection read-side state: just the PDU currently being filled. The
/// socket and the registered decoder live with the caller.
pub struct ReadEngine {
    current: Option<PduHandle>,
}

impl Default for ReadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadEngine {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Drain one freshly read `chunk` through `decode`, allocating PDUs from
    /// `pool` as needed and consulting `declared_len` to size overflow
    /// splits. Returns every outcome produced, in order; stops at the first
    /// `Closed`, leaving nothing current for the connection to keep reading
    /// into.
    pub fn on_read<E>(
        &mut self,
        pool: &Pool,
        chunk: &[u8],
        mut decode: impl FnMut(&[u8]) -> DecodeOutcome<E>,
        declared_len: impl Fn(&[u8]) -> Option<usize>,
    ) -> Vec<ReadAction<E>> {
        let mut outcomes = Vec::new();
        let mut remaining = chunk;

        loop {
            if self.current.is_none() {
                self.current = Some(pool.alloc_local());
            }
            let handle = self.current.as_ref().expect("just installed").clone();

            if !remaining.is_empty() {
                let mut pdu = handle.lock();
                let n = remaining.len();
                pdu.spare_capacity(n).copy_from_slice(remaining);
                pdu.commit(n);
                drop(pdu);
                remaining = &[];
            }

            let bytes = handle.lock().filled().to_vec();
            match decode(&bytes) {
                DecodeOutcome::Need(n) => {
                    handle.lock().need = Need::Bytes(n);
                    return outcomes;
                }
                DecodeOutcome::Dispatched(event) => {
                    outcomes.push(match event {
                        Some(e) => ReadAction::Dispatched(e),
                        None => ReadAction::Consumed,
                    });
                    if !self.recycle_or_split(pool, &bytes, &declared_len) {
                        return outcomes;
                    }
                }
                DecodeOutcome::Discard(reason) => {
                    outcomes.push(ReadAction::Discarded(reason));
                    if !self.recycle_or_split(pool, &bytes, &declared_len) {
                        return outcomes;
                    }
                }
                DecodeOutcome::Close(reason) => {
                    outcomes.push(ReadAction::Closed(reason));
                    if let Some(handle) = self.current.take() {
                        pool.reclaim(handle);
                    }
                    return outcomes;
                }
                DecodeOutcome::CloseAfterDispatch(event, reason) => {
                    if let Some(e) = event {
                        outcomes.push(ReadAction::Dispatched(e));
                    }
                    outcomes.push(ReadAction::Closed(reason));
                    if let Some(handle) = self.current.take() {
                        pool.reclaim(handle);
                    }
                    return outcomes;
                }
            }
        }
    }

    /// After a PDU finishes (dispatched or discarded), release it and, if
    /// the decoder consumed fewer bytes than are sitting in the arena,
    /// split the surplus into a fresh current PDU. Returns
    /// `true` if a fresh PDU is now current and the loop should keep going,
    /// `false` if the loop should stop and wait for more bytes.
    fn recycle_or_split(
        &mut self,
        pool: &Pool,
        consumed_from: &[u8],
        declared_len: &impl Fn(&[u8]) -> Option<usize>,
    ) -> bool {
        let handle = self.current.take().expect("current pdu present");
        let total = declared_len(consumed_from).unwrap_or(consumed_from.len());
        let fresh = {
            let mut pdu = handle.lock();
            pdu.split_overflow(total, pool.pdu_capacity())
        };
        pool.reclaim(handle);
        match fresh {
            Some(fresh) => {
                self.current = Some(crate::pdu::PduHandle::from_pdu(fresh));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal one-byte-length-prefixed toy protocol: `[len, payload...]`.
    /// Exercises the engine's Need/overflow-split machinery without needing
    /// real STANAG framing.
    fn toy_decode(bytes: &[u8]) -> DecodeOutcome<Vec<u8>> {
        let Some(&len) = bytes.first() else {
            return DecodeOutcome::Need(1);
        };
        let total = 1 + len as usize;
        if bytes.len() < total {
            return DecodeOutcome::Need(total - bytes.len());
        }
        DecodeOutcome::Dispatched(Some(bytes[1..total].to_vec()))
    }

    fn toy_declared_len(bytes: &[u8]) -> Option<usize> {
        bytes.first().map(|&len| 1 + len as usize)
    }

    #[test]
    fn single_pdu_exact_fit_dispatches_once() {
        let pool = Pool::new(1, 4, 64);
        let mut engine = ReadEngine::new();
        let outcomes = engine.on_read(&pool, &[2, b'h', b'i'], toy_decode, toy_declared_len);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            ReadAction::Dispatched(payload) => assert_eq!(payload, b"hi"),
            other => panic!("expected Dispatched, got {other:?}"),
        }
    }

    #[test]
    fn overflow_in_one_chunk_dispatches_both_pdus() {
        let pool = Pool::new(1, 4, 64);
        let mut engine = ReadEngine::new();
        let mut chunk = vec![2, b'h', b'i'];
        chunk.extend_from_slice(&[3, b'b', b'y', b'e']);
        let outcomes = engine.on_read(&pool, &chunk, toy_decode, toy_declared_len);
        assert_eq!(outcomes.len(), 2);
        match (&outcomes[0], &outcomes[1]) {
            (ReadAction::Dispatched(a), ReadAction::Dispatched(b)) => {
                assert_eq!(a, b"hi");
                assert_eq!(b, b"bye");
            }
            other => panic!("expected two Dispatched, got {other:?}"),
        }
    }

    #[test]
    fn partial_pdu_across_two_reads_dispatches_on_second() {
        let pool = Pool::new(1, 4, 64);
        let mut engine = ReadEngine::new();
        let first = engine.on_read(&pool, &[2, b'h'], toy_decode, toy_declared_len);
        assert!(first.is_empty());
        let second = engine.on_read(&pool, &[b'i'], toy_decode, toy_declared_len);
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], ReadAction::Dispatched(p) if p == b"hi"));
    }

    #[test]
    fn close_outcome_stops_draining_and_frees_current_pdu() {
        let pool = Pool::new(1, 4, 64);
        let mut engine = ReadEngine::new();
        let before = pool.free_len();
        let outcomes = engine.on_read(&pool, &[0xFF], |_| DecodeOutcome::<Vec<u8>>::Close("bad sync"), toy_declared_len);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], ReadAction::Closed("bad sync")));
        assert!(engine.current.is_none());
        assert_eq!(pool.free_len(), before + 1);
    }

    #[test]
    fn close_after_dispatch_emits_event_then_closes() {
        let pool = Pool::new(1, 4, 64);
        let mut engine = ReadEngine::new();
        let outcomes = engine.on_read(
            &pool,
            &[0xFF],
            |_| DecodeOutcome::CloseAfterDispatch(Some(b"rejected".to_vec()), "malformed"),
            toy_declared_len,
        );
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], ReadAction::Dispatched(p) if p == b"rejected"));
        assert!(matches!(&outcomes[1], ReadAction::Closed("malformed")));
        assert!(engine.current.is_none());
    }

    #[test]
    fn dts_declared_len_drives_real_overflow_split() {
        use crate::address::Address;
        use crate::dts::primitives::{build_frame, d_type};

        let pool = Pool::new(1, 4, 4096);
        let mut engine = ReadEngine::new();
        let src = Address::new(vec![1]).unwrap();
        let dst = Address::new(vec![2]).unwrap();
        let one = build_frame(d_type::RESET, 0, 0, &src, &dst, &[0], &[]);
        let two = build_frame(d_type::RESET, 0, 0, &src, &dst, &[0], &[]);
        let mut chunk = one.clone();
        chunk.extend_from_slice(&two);

        let outcomes = engine.on_read(&pool, &chunk, crate::dts::decode_dts, crate::dts::declared_len);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, ReadAction::Dispatched(_) | ReadAction::Consumed)));
    }
}
