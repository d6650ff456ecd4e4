//! Handler for the auxiliary listener protocols that carry no SIS/DTS
//! semantics (SMTP/HTTP gateways, the `test_ping` loopback): accept, log,
//! close. These sockets exist only so the daemon's listener table stays
//! uniform across every configured `proto`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::info;

use sis066_core::listener::Proto;

use crate::app::AppState;

pub async fn run(_stream: TcpStream, peer_addr: SocketAddr, proto: Proto, state: Arc<AppState>) {
    state.metrics.connections_total.with_label_values(&[proto.as_str()]).inc();
    state.metrics.connections_active.with_label_values(&[proto.as_str()]).inc();
    info!(peer = %peer_addr, proto = %proto, "accepted passive connection, closing immediately");
    state.metrics.connections_active.with_label_values(&[proto.as_str()]).dec();
}
