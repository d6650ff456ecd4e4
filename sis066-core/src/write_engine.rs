//! The write engine: two per-connection queues and a
//! scatter/gather flush.
//!
//! `to_write` is a FIFO of PDUs that have not yet had a single byte put on
//! the wire; `in_write` holds PDUs that finished writing but are still
//! referenced elsewhere (an ARQ transmit window slot awaiting an ACK) and so
//! cannot yet be handed back to the pool. A flush packs
//! up to `iov_max` `to_write` PDUs into one vectored write, advances each
//! PDU's `write_off` by its share of the bytes actually accepted, and only
//! pops a PDU off the front once every byte of it has left the process —
//! rewinding on a partial write rather than assuming the whole batch landed.

use std::collections::VecDeque;
use std::io::{self, IoSlice};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::pdu::PduHandle;
use crate::pool::Pool;

/// Sensible default for how many PDUs one vectored write batches together;
/// comfortably inside the platform `IOV_MAX` limit (typically 1024, but
/// some `writev` implementations silently clamp much lower).
pub const DEFAULT_IOV_MAX: usize = 16;

pub struct WriteQueues {
    to_write: VecDeque<PduHandle>,
    in_write: VecDeque<PduHandle>,
}

impl Default for WriteQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteQueues {
    pub fn new() -> Self {
        Self { to_write: VecDeque::new(), in_write: VecDeque::new() }
    }

    /// Queue `pdu` for its first write attempt.
    pub fn enqueue(&mut self, pdu: PduHandle) {
        self.to_write.push_back(pdu);
    }

    pub fn is_idle(&self) -> bool {
        self.to_write.is_empty()
    }

    pub fn to_write_len(&self) -> usize {
        self.to_write.len()
    }

    pub fn in_write_len(&self) -> usize {
        self.in_write.len()
    }

    /// Write as much of the head of `to_write` as the socket will currently
    /// accept, in one vectored syscall over at most `iov_max` PDUs. Returns
    /// the number of bytes actually written (0 if `to_write` was empty).
    pub async fn flush<W>(&mut self, writer: &mut W, pool: &Pool, iov_max: usize) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.to_write.is_empty() {
            return Ok(0);
        }

        let batch: Vec<PduHandle> = self.to_write.iter().take(iov_max.max(1)).cloned().collect();
        let n = {
            let guards: Vec<_> = batch.iter().map(|h| h.lock()).collect();
            let slices: Vec<IoSlice<'_>> =
                guards.iter().map(|g| IoSlice::new(&g.filled()[g.write_off..])).collect();
            writer.write_vectored(&slices).await?
        };

        let mut remaining = n;
        let mut fully_written = 0usize;
        for handle in &batch {
            if remaining == 0 {
                break;
            }
            let mut pdu = handle.lock();
            let unwritten = pdu.filled().len() - pdu.write_off;
            let take = remaining.min(unwritten);
            pdu.write_off += take;
            remaining -= take;
            if pdu.write_off == pdu.filled().len() {
                fully_written += 1;
            } else {
                break;
            }
        }

        for _ in 0..fully_written {
            let handle = self.to_write.pop_front().expect("counted against to_write above");
            if handle.strong_count() > 1 {
                self.in_write.push_back(handle);
            } else {
                pool.reclaim(handle);
            }
        }
        self.reap_in_write(pool);

        Ok(n)
    }

    /// Release any `in_write` entries whose last external reference has
    /// since gone away (e.g. an ARQ ACK released its transmit-window slot).
    /// Called after every flush and may also be called on its own by a
    /// connection's housekeeping tick.
    pub fn reap_in_write(&mut self, pool: &Pool) {
        self.in_write.retain(|handle| {
            if handle.strong_count() == 1 {
                pool.reclaim(handle.clone());
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{Pdu, PduHandle};

    fn pdu_with_bytes(bytes: &[u8]) -> PduHandle {
        let mut pdu = Pdu::new_request(bytes.len());
        pdu.spare_capacity(bytes.len()).copy_from_slice(bytes);
        pdu.commit(bytes.len());
        PduHandle::from_pdu(pdu)
    }

    #[tokio::test]
    async fn flush_writes_whole_batch_and_releases_to_pool() {
        let pool = Pool::new(0, 8, 64);
        let mut queues = WriteQueues::new();
        queues.enqueue(pdu_with_bytes(b"hello"));
        queues.enqueue(pdu_with_bytes(b"world"));

        let mut sink: Vec<u8> = Vec::new();
        let n = queues.flush(&mut sink, &pool, DEFAULT_IOV_MAX).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(sink, b"helloworld");
        assert!(queues.is_idle());
        assert_eq!(pool.free_len(), 2);
    }

    #[tokio::test]
    async fn partial_write_rewinds_and_keeps_pdu_at_front() {
        let pool = Pool::new(0, 8, 64);
        let mut queues = WriteQueues::new();
        queues.enqueue(pdu_with_bytes(b"abcdef"));

        struct Half(bool);
        impl tokio::io::AsyncWrite for Half {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &[u8],
            ) -> std::task::Poll<io::Result<usize>> {
                std::task::Poll::Ready(Ok(buf.len().min(3)))
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let mut half = Half(true);
        let n = queues.flush(&mut half, &pool, DEFAULT_IOV_MAX).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(queues.to_write_len(), 1, "partially-written pdu stays at the front");
    }

    #[tokio::test]
    async fn externally_referenced_pdu_parks_in_in_write_until_released() {
        let pool = Pool::new(0, 8, 64);
        let mut queues = WriteQueues::new();
        let handle = pdu_with_bytes(b"ack");
        let kept_alive = handle.clone();
        queues.enqueue(handle);

        let mut sink = Vec::new();
        queues.flush(&mut sink, &pool, DEFAULT_IOV_MAX).await.unwrap();
        assert!(queues.is_idle());
        assert_eq!(queues.in_write_len(), 1);
        assert_eq!(pool.free_len(), 0);

        drop(kept_alive);
        queues.reap_in_write(&pool);
        assert_eq!(queues.in_write_len(), 0);
        assert_eq!(pool.free_len(), 1);
    }
}
