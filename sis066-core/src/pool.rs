//! PDU buffer pool.
//!
//! A per-worker thread-local free list backed by a shared global list under
//! a short lock is the usual two-tier design for this kind of pool. STANAG
//! 5066 daemons run tens, not thousands, of connections, so a single
//! `Mutex`-guarded pool (following the short-critical-section locking style
//! used elsewhere in this codebase) is sufficient; `alloc_local`/
//! `alloc_shared` are kept as two distinct entry points purely so the
//! worker-local/global boundary stays visible at the call site, even though
//! both currently resolve to the same lock.

use std::sync::Mutex;

use crate::pdu::{Pdu, PduHandle};

pub struct Pool {
    free: Mutex<Vec<Pdu>>,
    pdu_capacity: usize,
    high_water: usize,
}

impl Pool {
    pub fn new(initial_pdus: usize, high_water: usize, pdu_capacity: usize) -> Self {
        let mut free = Vec::with_capacity(initial_pdus);
        for _ in 0..initial_pdus {
            free.push(Pdu::new_request(pdu_capacity));
        }
        Self { free: Mutex::new(free), pdu_capacity, high_water }
    }

    fn take_or_allocate(&self) -> Pdu {
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.pop().unwrap_or_else(|| Pdu::new_request(self.pdu_capacity))
    }

    /// Worker-local allocation path (misses fall through to the shared pool).
    pub fn alloc_local(&self) -> PduHandle {
        PduHandle::from_pdu(self.take_or_allocate())
    }

    /// Shared-pool allocation path, used when a worker's local cache is
    /// empty.
    pub fn alloc_shared(&self) -> PduHandle {
        PduHandle::from_pdu(self.take_or_allocate())
    }

    /// Return a PDU to the free list if this was the last outstanding
    /// handle (besides the caller's), else do nothing — some other list
    /// (a write queue, a `tx_pdus` slot) still references it. Called by
    /// housekeeping, not as a background task.
    pub fn reclaim(&self, handle: PduHandle) {
        if handle.strong_count() > 1 {
            return;
        }
        let Ok(mut pdu) = std::sync::Arc::try_unwrap(handle.0).map(|m| m.into_inner().unwrap())
        else {
            return;
        };
        pdu.scan = 0;
        pdu.len = None;
        pdu.need = crate::pdu::Need::Bytes(1);
        pdu.write_off = 0;

        let mut free = self.free.lock().expect("pool mutex poisoned");
        if free.len() < self.high_water {
            free.push(pdu);
        }
    }

    pub fn pdu_capacity(&self) -> usize {
        self.pdu_capacity
    }

    #[cfg(test)]
    pub fn free_len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_initializes_need_and_cursors() {
        let pool = Pool::new(2, 8, 64);
        let handle = pool.alloc_local();
        let pdu = handle.lock();
        assert_eq!(pdu.scan, 0);
        assert!(matches!(pdu.need, crate::pdu::Need::Bytes(1)));
    }

    #[test]
    fn reclaim_returns_unreferenced_pdu_to_free_list() {
        let pool = Pool::new(0, 8, 64);
        let handle = pool.alloc_local();
        assert_eq!(pool.free_len(), 0);
        pool.reclaim(handle);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn reclaim_is_noop_while_other_handles_remain() {
        let pool = Pool::new(0, 8, 64);
        let handle = pool.alloc_local();
        let clone = handle.clone();
        pool.reclaim(handle);
        assert_eq!(pool.free_len(), 0);
        drop(clone);
    }
}
