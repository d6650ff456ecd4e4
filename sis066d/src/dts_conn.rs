//! Per-DTS-connection task: one peer link, driving
//! that peer's ARQ/Non-ARQ state machine and the SIS↔DTS bridge in
//! the direction of delivery.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sis066_core::address::Address;
use sis066_core::bridge;
use sis066_core::connection::{ConnKind, Connection, ProtocolState};
use sis066_core::dts::{self, DtsAction, PeerState};
use sis066_core::read_engine::ReadAction;
use sis066_core::sis::TransmissionMode;

use crate::app::AppState;
use crate::routing::{FrameSender, PeerCommand};

const RETRANSMIT_TICK: Duration = Duration::from_millis(200);

pub async fn run(stream: TcpStream, peer_addr: SocketAddr, state: Arc<AppState>) {
    let id = state.ids.next();
    state.metrics.connections_total.with_label_values(&["dts"]).inc();
    state.metrics.connections_active.with_label_values(&["dts"]).inc();

    let mut learned = HashSet::new();
    if let Err(e) = serve(stream, peer_addr, id, &state, &mut learned).await {
        warn!(connection = id, peer = %peer_addr, error = %e, "dts connection ended with error");
    }

    for addr in &learned {
        state.routing.forget(addr);
    }
    state.metrics.connections_active.with_label_values(&["dts"]).dec();
}

fn peer_state(conn: &mut Connection) -> &mut PeerState {
    match &mut conn.protocol {
        ProtocolState::Dts(ps) => ps,
        _ => unreachable!("dts_conn always constructs ProtocolState::Dts"),
    }
}

async fn serve(
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: u64,
    state: &Arc<AppState>,
    learned: &mut HashSet<Address>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (cmd_tx, mut cmd_rx): (FrameSender, _) = mpsc::unbounded_channel();

    let ps = PeerState::new(
        state.station_address.clone(),
        Duration::from_millis(state.arq.retransmit_initial_ms),
        Duration::from_millis(state.arq.retransmit_max_ms),
        state.arq.max_retransmits,
    );
    let mut conn = Connection::new(id, ConnKind::Dts, peer_addr, ProtocolState::Dts(ps));
    let mut buf = vec![0u8; state.pool.pdu_capacity()];
    let mut current_peer = state.station_address.clone();
    let mut retransmit_tick = tokio::time::interval(RETRANSMIT_TICK);

    loop {
        tokio::select! {
            read_result = reader.read(&mut buf) => {
                let n = read_result?;
                if n == 0 {
                    return Ok(());
                }
                conn.stats.record_read(n);
                let outcomes = conn.read.on_read(&state.pool, &buf[..n], dts::decode_dts, dts::declared_len);
                for outcome in outcomes {
                    match outcome {
                        ReadAction::Dispatched(frame) => {
                            conn.stats.record_decoded_pdu();
                            state.metrics.pdus_decoded_total.with_label_values(&["dts"]).inc();
                            let src = frame.src.clone();
                            if learned.insert(src.clone()) {
                                state.routing.learn(&src, cmd_tx.clone());
                            }
                            current_peer = src;
                            let actions = peer_state(&mut conn).on_frame(frame, Instant::now());
                            for action in actions {
                                apply_dts_action(state, &mut conn, action).await;
                            }
                        }
                        ReadAction::Consumed => {
                            conn.stats.record_decoded_pdu();
                        }
                        ReadAction::Discarded(reason) => {
                            state.metrics.pdus_discarded_total.with_label_values(&[reason]).inc();
                            debug!(connection = id, reason, "dts pdu discarded");
                        }
                        ReadAction::Closed(reason) => {
                            warn!(connection = id, reason, "dts connection closed by decoder");
                            return Ok(());
                        }
                    }
                }
                flush(&mut conn, &mut writer, state).await?;
            }
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    PeerCommand::Frame(wire) => enqueue_wire(state, &mut conn, wire),
                    PeerCommand::ArqSend(dest, c_pdu) => {
                        match peer_state(&mut conn).transmit_arq(&c_pdu, &dest, Instant::now()) {
                            Ok(frames) => {
                                for frame in frames {
                                    enqueue_wire(state, &mut conn, frame);
                                }
                            }
                            Err(e) => {
                                warn!(connection = id, error = %e, "dropping arq send: transmit window full");
                            }
                        }
                    }
                }
                flush(&mut conn, &mut writer, state).await?;
            }
            _ = retransmit_tick.tick() => {
                let due = peer_state(&mut conn).due_retransmits(&current_peer, Instant::now());
                if !due.is_empty() {
                    state.metrics.arq_retransmits_total.inc_by(due.len() as u64);
                    for frame in due {
                        enqueue_wire(state, &mut conn, frame);
                    }
                    flush(&mut conn, &mut writer, state).await?;
                }
                state.metrics.arq_window_occupancy.set(peer_state(&mut conn).tx.occupancy() as i64);
                state.metrics.nonarq_slots_in_use.set(peer_state(&mut conn).nonarq.slots_in_use() as i64);
            }
        }
    }
}

async fn apply_dts_action(state: &Arc<AppState>, conn: &mut Connection, action: DtsAction) {
    match action {
        DtsAction::Transmit(wire) => enqueue_wire(state, conn, wire),
        DtsAction::Deliver { src, dst, mut payload } => {
            if payload.is_empty() {
                state.metrics.pdus_discarded_total.with_label_values(&["empty reassembled c_pdu"]).inc();
                return;
            }
            let dest_sap = payload.remove(0);
            deliver_to_sap(state, dest_sap, &src, &dst, &payload).await;
        }
    }
}

/// Hand a reassembled U_PDU to its bound SAP as a UNIDATA_INDICATION. The
/// transmission mode and delivery mode negotiated on the SIS side are not
/// carried over the DTS wire format, so every delivery is reported with
/// fixed placeholder values (see DESIGN.md).
async fn deliver_to_sap(state: &Arc<AppState>, dest_sap: u8, src: &Address, dst: &Address, payload: &[u8]) {
    let Some(sender) = state.sap_table.sender(dest_sap) else {
        state.metrics.pdus_discarded_total.with_label_values(&["delivery to unbound sap"]).inc();
        return;
    };
    let wire = bridge::build_unidata_indication(
        dest_sap,
        bridge::dts_addr_to_sis(src),
        bridge::dts_addr_to_sis(dst),
        0,
        TransmissionMode::NonArq,
        payload,
    );
    let handle = state.pool.alloc_local();
    {
        let mut pdu = handle.lock();
        pdu.spare_capacity(wire.len()).copy_from_slice(&wire);
        pdu.commit(wire.len());
    }
    if sender.send(handle).await.is_err() {
        debug!(dest_sap, "delivery channel closed; owning sis connection already gone");
    }
}

fn enqueue_wire(state: &Arc<AppState>, conn: &mut Connection, wire: Vec<u8>) {
    let handle = state.pool.alloc_local();
    {
        let mut pdu = handle.lock();
        pdu.spare_capacity(wire.len()).copy_from_slice(&wire);
        pdu.commit(wire.len());
    }
    conn.write.enqueue(handle);
    conn.stats.record_sent_pdu();
}

async fn flush(
    conn: &mut Connection,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    state: &Arc<AppState>,
) -> std::io::Result<()> {
    while !conn.write.is_idle() {
        let n = conn.write.flush(writer, &state.pool, sis066_core::write_engine::DEFAULT_IOV_MAX).await?;
        conn.stats.record_write(n);
        if n == 0 {
            break;
        }
    }
    Ok(())
}
