//! Per-SIS-connection task: one client socket bound
//! to at most one SAP at a time, decoding BIND/UNBIND/UNIDATA primitives and
//! forwarding reassembled DTS traffic addressed to its bound SAP back out as
//! UNIDATA_INDICATIONs.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sis066_core::bridge;
use sis066_core::connection::{ConnKind, Connection, ProtocolState};
use sis066_core::dts::primitives::MAX_SEGMENT;
use sis066_core::pdu::PduHandle;
use sis066_core::read_engine::ReadAction;
use sis066_core::sis::{self, SisEvent, TransmissionMode, UnidataRequest};

use crate::app::AppState;
use crate::routing::PeerCommand;

const NEGOTIATED_MTU: u16 = sis066_core::sis::primitives::BROADCAST_MTU as u16;
const DELIVERY_CHANNEL_DEPTH: usize = 64;

pub async fn run(stream: TcpStream, peer_addr: SocketAddr, state: Arc<AppState>) {
    let id = state.ids.next();
    state.metrics.connections_total.with_label_values(&["sis"]).inc();
    state.metrics.connections_active.with_label_values(&["sis"]).inc();

    if let Err(e) = serve(stream, peer_addr, id, &state).await {
        warn!(connection = id, peer = %peer_addr, error = %e, "sis connection ended with error");
    }

    state.sap_table.release_connection(id);
    state.metrics.connections_active.with_label_values(&["sis"]).dec();
    info!(connection = id, peer = %peer_addr, "sis connection closed");
}

async fn serve(
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: u64,
    state: &Arc<AppState>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (delivery_tx, mut delivery_rx) = mpsc::channel::<PduHandle>(DELIVERY_CHANNEL_DEPTH);
    let mut conn = Connection::new(id, ConnKind::Sis, peer_addr, ProtocolState::Sis { sap_bound: None });
    let mut buf = vec![0u8; state.pool.pdu_capacity()];

    loop {
        tokio::select! {
            read_result = reader.read(&mut buf) => {
                let n = read_result?;
                if n == 0 {
                    return Ok(());
                }
                conn.stats.record_read(n);
                let sap_table = &state.sap_table;
                let outcomes = conn.read.on_read(
                    &state.pool,
                    &buf[..n],
                    |bytes| sis::decode_sis(bytes, sap_table, id, &delivery_tx, NEGOTIATED_MTU),
                    sis::declared_len,
                );
                for outcome in outcomes {
                    match outcome {
                        ReadAction::Dispatched(event) => {
                            conn.stats.record_decoded_pdu();
                            state.metrics.pdus_decoded_total.with_label_values(&["sis"]).inc();
                            handle_event(state, &mut conn, event);
                        }
                        ReadAction::Consumed => {
                            conn.stats.record_decoded_pdu();
                        }
                        ReadAction::Discarded(reason) => {
                            state.metrics.pdus_discarded_total.with_label_values(&[reason]).inc();
                            debug!(connection = id, reason, "sis pdu discarded");
                        }
                        ReadAction::Closed(reason) => {
                            warn!(connection = id, reason, "sis connection closed by decoder");
                            flush(&mut conn, &mut writer, state).await?;
                            return Ok(());
                        }
                    }
                }
                flush(&mut conn, &mut writer, state).await?;
            }
            Some(handle) = delivery_rx.recv() => {
                conn.write.enqueue(handle);
                conn.stats.record_sent_pdu();
                flush(&mut conn, &mut writer, state).await?;
            }
        }
    }
}

fn handle_event(state: &Arc<AppState>, conn: &mut Connection, event: SisEvent) {
    match event {
        SisEvent::Bound { sap, mtu } => {
            if let ProtocolState::Sis { sap_bound } = &mut conn.protocol {
                *sap_bound = Some(sap);
            }
            enqueue_wire(state, conn, sis::encode::bind_accepted(sap, mtu));
        }
        SisEvent::BindRejected { sap } => {
            enqueue_wire(state, conn, sis::encode::bind_rejected(sap));
        }
        SisEvent::Unbound { sap } => {
            if let ProtocolState::Sis { sap_bound } = &mut conn.protocol {
                if *sap_bound == Some(sap) {
                    *sap_bound = None;
                }
            }
            enqueue_wire(state, conn, sis::encode::unbind_indication(sap));
        }
        SisEvent::UnidataRequest(req) => transmit_unidata(state, conn, req, false),
        SisEvent::ExpeditedUnidataRequest(req) => transmit_unidata(state, conn, req, true),
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
}

/// Admit and route one UNIDATA_REQUEST. The dest SAP byte is
/// prepended to the C_PDU carried over DTS — see DESIGN.md's resolution of
/// how a reassembled C_PDU on the remote end learns which local SAP to
/// deliver to, since the DTS wire format has no field for it.
fn transmit_unidata(state: &Arc<AppState>, conn: &Connection, req: UnidataRequest, expedited: bool) {
    let sap_bound = match &conn.protocol {
        ProtocolState::Sis { sap_bound } => *sap_bound,
        _ => None,
    };
    if sap_bound.is_none() {
        state.metrics.pdus_discarded_total.with_label_values(&["unidata from unbound connection"]).inc();
        return;
    }
    if let Err(reason) = bridge::admit(req.payload.len(), NEGOTIATED_MTU, req.tx_mode) {
        state.metrics.pdus_discarded_total.with_label_values(&[reason]).inc();
        return;
    }

    let dest = bridge::sis_addr_to_dts(req.dest_addr);
    let mut c_pdu = Vec::with_capacity(1 + req.payload.len());
    c_pdu.push(req.dest_sap);
    c_pdu.extend_from_slice(&req.payload);

    // Expedited traffic should jump the outbound queue; this
    // routing layer is plain FIFO, so expedited and normal UNIDATA are
    // currently dispatched identically (see DESIGN.md).
    let _ = expedited;

    match req.tx_mode {
        TransmissionMode::Arq => {
            state.routing.route(&dest, PeerCommand::ArqSend(dest.clone(), c_pdu));
        }
        TransmissionMode::NonArq | TransmissionMode::Broadcast => {
            let c_pdu_id = state.next_c_pdu_id();
            let frames = bridge::build_nonarq_frames(
                c_pdu_id,
                &c_pdu,
                MAX_SEGMENT,
                0,
                &state.station_address,
                &dest,
            );
            for frame in frames {
                state.routing.route(&dest, PeerCommand::Frame(frame));
            }
        }
    }
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
