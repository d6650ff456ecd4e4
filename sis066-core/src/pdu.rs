//! The PDU buffer: the pool-allocated unit of I/O shared by the read engine,
//! write engine, and both protocol decoders.
//!
//! The arena is an owned `Vec<u8>`, the read/write cursors are plain `usize`
//! offsets into it, and a [`PduHandle`] (`Arc<Mutex<Pdu>>`) clone is how any
//! list that must outlive the first write — an ARQ transmit-window slot, an
//! `in_write` entry — keeps a PDU alive past its first flush; the pool
//! reclaims it once the last such clone drops (see [`crate::pool::Pool::reclaim`]).

use std::sync::{Arc, Mutex};

/// What the read engine still owes this PDU before the registered decoder
/// can make progress, or the terminal outcome of its last decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Need {
    /// At least this many more bytes must be read before decoding resumes.
    Bytes(usize),
    /// Fully decoded and dispatched; release this PDU to the pool.
    Done,
    /// The connection owning this PDU must be closed.
    Close,
}

pub struct Pdu {
    arena: Vec<u8>,
    /// End of valid written bytes.
    ap: usize,
    /// Parser cursor into the committed bytes.
    pub scan: usize,
    /// Self-declared total length, once the decoder has parsed enough of
    /// the header to know it.
    pub len: Option<usize>,
    pub need: Need,
    /// Write-side cursor: bytes `[0, write_off)` are already on the
    /// wire. Unrelated to `scan`, which is the read-side parser cursor.
    pub write_off: usize,
}

impl Pdu {
    fn new(capacity: usize) -> Self {
        Self {
            arena: Vec::with_capacity(capacity),
            ap: 0,
            scan: 0,
            len: None,
            need: Need::Bytes(1),
            write_off: 0,
        }
    }

    /// Bytes committed so far, from the arena start to `ap`.
    pub fn filled(&self) -> &[u8] {
        &self.arena[..self.ap]
    }

    /// Bytes not yet examined by the decoder (`[scan, ap)`).
    pub fn unscanned(&self) -> &[u8] {
        &self.arena[self.scan..self.ap]
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Remaining writable room in the arena (`[ap, capacity)`), growing the
    /// backing vector on demand up to `capacity()`.
    pub fn spare_capacity(&mut self, want: usize) -> &mut [u8] {
        let needed = self.ap + want;
        if self.arena.len() < needed {
            self.arena.resize(needed, 0);
        }
        &mut self.arena[self.ap..needed]
    }

    /// Record that `n` freshly-read bytes landed in the region returned by
    /// the most recent `spare_capacity` call.
    pub fn commit(&mut self, n: usize) {
        self.ap += n;
    }

    pub fn bytes_available(&self) -> usize {
        self.ap - self.scan
    }

    /// Overflow handling: split the bytes beyond the
    /// self-declared length into a freshly allocated PDU, leaving this one
    /// trimmed to exactly its declared length.
    pub fn split_overflow(&mut self, declared_len: usize, fresh_capacity: usize) -> Option<Pdu> {
        if self.ap <= declared_len {
            return None;
        }
        let surplus = self.arena[declared_len..self.ap].to_vec();
        self.ap = declared_len;
        self.arena.truncate(declared_len);

        let mut fresh = Pdu::new(fresh_capacity.max(surplus.len()));
        fresh.arena.extend_from_slice(&surplus);
        fresh.ap = surplus.len();
        Some(fresh)
    }
}

/// A pool-issued reference to a [`Pdu`]. Cloning a handle shares ownership;
/// the pool reclaims a PDU once it observes no handle beyond its own
/// bookkeeping copy remains (see [`crate::pool::Pool::reclaim`]).
#[derive(Clone)]
pub struct PduHandle(pub(crate) Arc<Mutex<Pdu>>);

impl PduHandle {
    pub(crate) fn from_pdu(pdu: Pdu) -> Self {
        Self(Arc::new(Mutex::new(pdu)))
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, Pdu> {
        self.0.lock().expect("pdu mutex poisoned")
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Pdu {
    pub fn new_request(capacity: usize) -> Pdu {
        Pdu::new(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spare_capacity_grows_and_commit_advances_ap() {
        let mut pdu = Pdu::new_request(4);
        {
            let buf = pdu.spare_capacity(4);
            buf.copy_from_slice(b"abcd");
        }
        pdu.commit(4);
        assert_eq!(pdu.filled(), b"abcd");
        assert_eq!(pdu.bytes_available(), 4);
    }

    #[test]
    fn split_overflow_preserves_surplus_bytes() {
        let mut pdu = Pdu::new_request(16);
        {
            let buf = pdu.spare_capacity(9);
            buf.copy_from_slice(b"AAAAABBBB");
        }
        pdu.commit(9);
        let fresh = pdu.split_overflow(5, 16).expect("overflow expected");
        assert_eq!(pdu.filled(), b"AAAAA");
        assert_eq!(fresh.filled(), b"BBBB");
    }

    #[test]
    fn no_overflow_when_exactly_declared_len() {
        let mut pdu = Pdu::new_request(16);
        {
            let buf = pdu.spare_capacity(5);
            buf.copy_from_slice(b"AAAAA");
        }
        pdu.commit(5);
        assert!(pdu.split_overflow(5, 16).is_none());
    }
}
