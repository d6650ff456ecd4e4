//! The connection registry: a socket's protocol tag, peer
//! address, read/write engines, counters, and protocol-specific state in
//! one place. Workers share the PDU pool and SAP table under short locks
//!; a `Connection` itself belongs to exactly one worker task and needs
//! no locking of its own.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dts::PeerState;
use crate::listener::Proto;
use crate::read_engine::ReadEngine;
use crate::write_engine::WriteQueues;

/// A connection's protocol tag, extended with `Listen` for the accept-only
/// socket, which never gets a read/write engine of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Sis,
    Dts,
    Smtp,
    Http,
    TestPing,
    Listen,
}

impl From<Proto> for ConnKind {
    fn from(p: Proto) -> Self {
        match p {
            Proto::Sis => ConnKind::Sis,
            Proto::Dts => ConnKind::Dts,
            Proto::Smtp => ConnKind::Smtp,
            Proto::Http => ConnKind::Http,
            Proto::TestPing => ConnKind::TestPing,
        }
    }
}

impl ConnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnKind::Sis => "sis",
            ConnKind::Dts => "dts",
            ConnKind::Smtp => "smtp",
            ConnKind::Http => "http",
            ConnKind::TestPing => "test_ping",
            ConnKind::Listen => "listen",
        }
    }
}

/// Monotonically increasing connection ids, shared across every worker.
#[derive(Default)]
pub struct ConnectionIds(AtomicU64);

impl ConnectionIds {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Byte/PDU counters maintained per connection, surfaced via `/metrics` and
/// closing-connection log lines.
#[derive(Default)]
pub struct ConnStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub pdus_in: AtomicU64,
    pub pdus_out: AtomicU64,
}

impl ConnStats {
    pub fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_decoded_pdu(&self) {
        self.pdus_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent_pdu(&self) {
        self.pdus_out.fetch_add(1, Ordering::Relaxed);
    }
}

/// Protocol-specific state a connection carries beyond the generic
/// read/write machinery.
pub enum ProtocolState {
    Sis { sap_bound: Option<u8> },
    Dts(PeerState),
    /// SMTP/HTTP/TEST_PING collaborators and the accept-only listener
    /// socket carry no state of their own here.
    Passive,
}

/// A socket's full connection state.
pub struct Connection {
    pub id: u64,
    pub kind: ConnKind,
    pub peer_addr: SocketAddr,
    pub read: ReadEngine,
    pub write: WriteQueues,
    pub stats: ConnStats,
    pub protocol: ProtocolState,
}

impl Connection {
    pub fn new(id: u64, kind: ConnKind, peer_addr: SocketAddr, protocol: ProtocolState) -> Self {
        Self {
            id,
            kind,
            peer_addr,
            read: ReadEngine::new(),
            write: WriteQueues::new(),
            stats: ConnStats::default(),
            protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn connection_ids_increment_monotonically() {
        let ids = ConnectionIds::default();
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn proto_maps_onto_matching_conn_kind() {
        assert_eq!(ConnKind::from(Proto::Sis), ConnKind::Sis);
        assert_eq!(ConnKind::from(Proto::Dts), ConnKind::Dts);
        assert_eq!(ConnKind::from(Proto::TestPing).as_str(), "test_ping");
    }

    #[test]
    fn stats_start_at_zero_and_accumulate() {
        let stats = ConnStats::default();
        stats.record_read(10);
        stats.record_decoded_pdu();
        assert_eq!(stats.bytes_in.load(Ordering::Relaxed), 10);
        assert_eq!(stats.pdus_in.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_out.load(Ordering::Relaxed), 0);
    }
}
