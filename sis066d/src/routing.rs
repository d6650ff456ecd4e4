//! SIS↔DTS bridge routing table: which outbound DTS peer connection should
//! carry traffic addressed to a given STANAG node address.
//!
//! **Design decision (see DESIGN.md):** there is no multi-hop routing
//! table described anywhere — STANAG 5066 in
//! practice runs one subnetwork per HF channel, so a single DTS peer link
//! is the common case. This table still supports several simultaneous DTS
//! peers (useful for testing and for sites relaying between more than one
//! link): traffic addressed to a node this table has not yet seen frames
//! from is sent to every connected peer, and a node's entry is learned the
//! first time a frame from it arrives.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use sis066_core::address::Address;

/// What the bridge hands to a DTS peer connection task. The task alone
/// owns that peer's `PeerState`, so ARQ transmission (which must allocate
/// from that peer's transmit window) is requested rather than pre-encoded;
/// Non-ARQ and control frames are already fully encoded by the caller.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// A fully-built D_PDU to send as-is (Non-ARQ segments are already
    /// segmented and encoded by the bridge before routing).
    Frame(Vec<u8>),
    /// A C_PDU for the owning peer task to ARQ-segment, window-allocate,
    /// and transmit. Carries the destination
    /// address separately from the C_PDU bytes: a connection this table
    /// falls back to broadcasting on (destination not yet learned) may not
    /// itself know which address it is now carrying traffic for, but every
    /// DTS frame still needs a `dst` field.
    ArqSend(Address, Vec<u8>),
}

pub type FrameSender = mpsc::UnboundedSender<PeerCommand>;

#[derive(Default)]
pub struct RoutingTable {
    routes: Mutex<HashMap<Vec<u8>, FrameSender>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `addr` is reachable via `sender` — called the first
    /// time a frame from that address arrives on a DTS peer connection,
    /// and refreshed on every subsequent frame (addresses are not assumed
    /// static).
    pub fn learn(&self, addr: &Address, sender: FrameSender) {
        self.routes.lock().expect("routing table poisoned").insert(addr.nibbles().to_vec(), sender);
    }

    pub fn forget(&self, addr: &Address) {
        self.routes.lock().expect("routing table poisoned").remove(addr.nibbles());
    }

    /// Forward `cmd` to the peer registered for `dst`, or to every
    /// connected peer if the destination has not been seen yet.
    pub fn route(&self, dst: &Address, cmd: PeerCommand) {
        let routes = self.routes.lock().expect("routing table poisoned");
        match routes.get(dst.nibbles()) {
            Some(sender) => {
                let _ = sender.send(cmd);
            }
            None => {
                for sender in routes.values() {
                    let _ = sender.send(cmd.clone());
                }
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.routes.lock().expect("routing table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_learned_peer_without_broadcasting() {
        let table = RoutingTable::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let addr_a = Address::new(vec![1]).unwrap();
        table.learn(&addr_a, tx_a);
        table.learn(&Address::new(vec![2]).unwrap(), tx_b);

        table.route(&addr_a, PeerCommand::Frame(vec![0xAA]));
        assert!(matches!(rx_a.try_recv().unwrap(), PeerCommand::Frame(f) if f == vec![0xAA]));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unknown_destination_broadcasts_to_all_peers() {
        let table = RoutingTable::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        table.learn(&Address::new(vec![1]).unwrap(), tx_a);
        table.learn(&Address::new(vec![2]).unwrap(), tx_b);

        table.route(&Address::new(vec![9]).unwrap(), PeerCommand::Frame(vec![0xBB]));
        assert!(matches!(rx_a.try_recv().unwrap(), PeerCommand::Frame(f) if f == vec![0xBB]));
        assert!(matches!(rx_b.try_recv().unwrap(), PeerCommand::Frame(f) if f == vec![0xBB]));
    }

    #[test]
    fn arq_send_command_routes_like_a_frame() {
        let table = RoutingTable::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let addr_a = Address::new(vec![1]).unwrap();
        table.learn(&addr_a, tx_a);

        table.route(&addr_a, PeerCommand::ArqSend(addr_a.clone(), vec![1, 2, 3]));
        assert!(matches!(rx_a.try_recv().unwrap(), PeerCommand::ArqSend(d, p) if d == addr_a && p == vec![1, 2, 3]));
    }
}
