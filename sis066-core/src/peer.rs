//! Outbound DTS peer dialing: a `dts:<host>:<port>`
//! positional CLI argument or `[[peer]]` config entry instructs the daemon
//! to actively connect out at startup, rather than only waiting on a
//! listener. Once connected, the resulting socket is an ordinary DTS
//! connection indistinguishable from one that dialed in.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::listener::PeerSpec;

/// Connect to one configured outbound peer. A peer that refuses or times
/// out is logged and skipped rather than treated as a startup-fatal error
/// — the daemon still serves whatever other listeners
/// and peers came up.
pub async fn dial(spec: &PeerSpec) -> Option<(TcpStream, SocketAddr)> {
    let target = format!("{}:{}", spec.host, spec.port);
    match TcpStream::connect(&target).await {
        Ok(stream) => match stream.peer_addr() {
            Ok(peer_addr) => {
                info!(peer = %target, "connected outbound dts peer");
                Some((stream, peer_addr))
            }
            Err(e) => {
                warn!(peer = %target, error = %e, "connected but could not read peer address");
                None
            }
        },
        Err(e) => {
            warn!(peer = %target, error = %e, "failed to connect outbound dts peer");
            None
        }
    }
}

/// Dial every configured peer concurrently, dropping any that failed.
pub async fn dial_all(specs: &[PeerSpec]) -> Vec<(TcpStream, SocketAddr)> {
    let mut set = tokio::task::JoinSet::new();
    for spec in specs {
        let spec = spec.clone();
        set.spawn(async move { dial(&spec).await });
    }
    let mut connected = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok(Some(pair)) = res {
            connected.push(pair);
        }
    }
    connected
}
