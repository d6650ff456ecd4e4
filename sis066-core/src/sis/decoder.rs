//! SIS (Annex A) primitive decoder.

use super::primitives::{self, primitive, TransmissionMode};
use crate::decode::DecodeOutcome;
use crate::sap::{DeliverySender, SapTable};

#[derive(Debug)]
pub enum SisEvent {
    Bound { sap: u8, mtu: u16 },
    BindRejected { sap: u8 },
    Unbound { sap: u8 },
    UnidataRequest(UnidataRequest),
    /// An EXPEDITED_UNIDATA_REQUEST: identical payload semantics to
    /// `UnidataRequest`, but the bridge must place it at the front of the
    /// outbound queue rather than the back.
    ExpeditedUnidataRequest(UnidataRequest),
}

#[derive(Debug, Clone)]
pub struct UnidataRequest {
    pub dest_sap: u8,
    pub dest_addr: [u8; 4],
    pub delivery_mode: u8,
    pub tx_mode: TransmissionMode,
    pub payload: Vec<u8>,
}

/// Attempt to decode one complete SIS PDU (`full_pdu` is exactly
/// `primitives::HEADER_LEN + length` bytes, as sized by the read engine).
///
/// `sap_table`/`connection_id` let BIND_REQUEST and UNBIND_REQUEST act
/// directly on the binding registry, decoding and mutating in the same
/// pass for control primitives.
pub fn decode_sis(
    full_pdu: &[u8],
    sap_table: &SapTable,
    connection_id: u64,
    delivery_sender: &DeliverySender,
    negotiated_mtu: u16,
) -> DecodeOutcome<SisEvent> {
    if full_pdu.len() < primitives::HEADER_LEN {
        return DecodeOutcome::Need(primitives::HEADER_LEN - full_pdu.len());
    }
    let Some(declared_len) = primitives::peek_header(full_pdu) else {
        return DecodeOutcome::Close("sis preamble mismatch");
    };
    let total = primitives::HEADER_LEN + declared_len as usize;
    if full_pdu.len() < total {
        return DecodeOutcome::Need(total - full_pdu.len());
    }
    let body = &full_pdu[primitives::HEADER_LEN..total];
    let Some((&prim_type, fields)) = body.split_first() else {
        return DecodeOutcome::Close("sis pdu has no primitive type byte");
    };

    match prim_type {
        primitive::BIND_REQUEST => decode_bind_request(fields, sap_table, connection_id, delivery_sender, negotiated_mtu),
        primitive::UNBIND_REQUEST => decode_unbind_request(fields, sap_table, connection_id),
        primitive::UNIDATA_REQUEST => {
            decode_unidata_request(fields).map(SisEvent::UnidataRequest)
        }
        primitive::EXPEDITED_UNIDATA_REQUEST => {
            decode_unidata_request(fields).map(SisEvent::ExpeditedUnidataRequest)
        }
        _ => DecodeOutcome::Discard("unrecognized sis primitive type"),
    }
}

fn decode_bind_request(
    fields: &[u8],
    sap_table: &SapTable,
    connection_id: u64,
    delivery_sender: &DeliverySender,
    negotiated_mtu: u16,
) -> DecodeOutcome<SisEvent> {
    // body >= 4 bytes total (type byte included): sap/rank byte + 2-byte
    // service type, i.e. `fields` itself must hold at least 3 bytes.
    if fields.len() < 3 {
        return DecodeOutcome::CloseAfterDispatch(
            Some(SisEvent::BindRejected { sap: 0 }),
            "malformed bind request",
        );
    }
    let sap = fields[0] >> 4;
    let rank = fields[0] & 0x0F;
    let service_type = u16::from_be_bytes([fields[1], fields[2]]);

    match sap_table.bind(sap, connection_id, rank, service_type, delivery_sender.clone()) {
        Ok(()) => DecodeOutcome::Dispatched(Some(SisEvent::Bound { sap, mtu: negotiated_mtu })),
        Err(_) => DecodeOutcome::Dispatched(Some(SisEvent::BindRejected { sap })),
    }
}

fn decode_unbind_request(
    fields: &[u8],
    sap_table: &SapTable,
    connection_id: u64,
) -> DecodeOutcome<SisEvent> {
    let Some(&sap_byte) = fields.first() else {
        return DecodeOutcome::Discard("unbind request missing sap byte");
    };
    let sap = sap_byte >> 4;
    match sap_table.unbind(sap, connection_id) {
        Ok(()) => DecodeOutcome::Dispatched(Some(SisEvent::Unbound { sap })),
        Err(_) => DecodeOutcome::Discard("unbind request for unowned sap"),
    }
}

fn decode_unidata_request(fields: &[u8]) -> DecodeOutcome<UnidataRequest> {
    // sap/mode byte, 4-byte dest addr, delivery mode, tx mode, u16 length.
    const FIXED_LEN: usize = 1 + 4 + 1 + 1 + 2;
    if fields.len() < FIXED_LEN {
        return DecodeOutcome::Discard("unidata request truncated header");
    }
    let dest_sap = fields[0] & 0x0F;
    let dest_addr = [fields[1], fields[2], fields[3], fields[4]];
    let delivery_mode = fields[5];
    let Some(tx_mode) = TransmissionMode::from_wire(fields[6]) else {
        return DecodeOutcome::Discard("unidata request has unknown transmission mode");
    };
    let u_pdu_len = u16::from_be_bytes([fields[7], fields[8]]) as usize;
    let payload = &fields[FIXED_LEN..];
    if payload.len() != u_pdu_len {
        return DecodeOutcome::Discard("unidata request u_pdu length mismatch");
    }
    if u_pdu_len > primitives::BROADCAST_MTU {
        return DecodeOutcome::Discard("unidata request exceeds broadcast mtu");
    }

    DecodeOutcome::Dispatched(Some(UnidataRequest {
        dest_sap,
        dest_addr,
        delivery_mode,
        tx_mode,
        payload: payload.to_vec(),
    }))
}

/// The self-declared total length of the PDU currently being read, once
/// computable — used by the read engine's overflow-split handling (
/// step 4), mirroring `dts::decoder::declared_len`.
pub fn declared_len(bytes: &[u8]) -> Option<usize> {
    let len = primitives::peek_header(bytes)?;
    Some(primitives::HEADER_LEN + len as usize)
}

impl<E> DecodeOutcome<E> {
    fn map<F, U>(self, f: F) -> DecodeOutcome<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            DecodeOutcome::Need(n) => DecodeOutcome::Need(n),
            DecodeOutcome::Dispatched(e) => DecodeOutcome::Dispatched(e.map(f)),
            DecodeOutcome::Discard(r) => DecodeOutcome::Discard(r),
            DecodeOutcome::Close(r) => DecodeOutcome::Close(r),
            DecodeOutcome::CloseAfterDispatch(e, r) => DecodeOutcome::CloseAfterDispatch(e.map(f), r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_and_sender() -> (SapTable, DeliverySender) {
        (SapTable::new(), tokio::sync::mpsc::channel(1).0)
    }

    #[test]
    fn bind_handshake_claims_sap_then_rejects_second_claimant() {
        let (table, tx) = table_and_sender();
        let pdu = [0x90, 0xEB, 0x00, 0x00, 0x04, 0x01, 0x30, 0x00, 0x00];
        match decode_sis(&pdu, &table, 1, &tx, 2048) {
            DecodeOutcome::Dispatched(Some(SisEvent::Bound { sap, mtu })) => {
                assert_eq!(sap, 3);
                assert_eq!(mtu, 2048);
            }
            _ => panic!("expected Bound"),
        }

        match decode_sis(&pdu, &table, 2, &tx, 2048) {
            DecodeOutcome::Dispatched(Some(SisEvent::BindRejected { sap })) => assert_eq!(sap, 3),
            _ => panic!("expected BindRejected"),
        }
    }

    #[test]
    fn malformed_bind_request_rejects_and_closes() {
        let (table, tx) = table_and_sender();
        // primitive type BIND_REQUEST followed by a single field byte,
        // short of the required sap/rank + 2-byte service type.
        let pdu = [0x90, 0xEB, 0x00, 0x00, 0x01, 0x01, 0x30];
        match decode_sis(&pdu, &table, 1, &tx, 2048) {
            DecodeOutcome::CloseAfterDispatch(Some(SisEvent::BindRejected { sap }), _) => {
                assert_eq!(sap, 0);
            }
            _ => panic!("expected CloseAfterDispatch(BindRejected)"),
        }
    }

    #[test]
    fn bad_preamble_closes_connection() {
        let (table, tx) = table_and_sender();
        let pdu = [0x00, 0xEB, 0x00, 0x00, 0x04, 0x01, 0x30, 0x00, 0x00];
        assert!(matches!(decode_sis(&pdu, &table, 1, &tx, 2048), DecodeOutcome::Close(_)));
    }

    #[test]
    fn unidata_over_broadcast_mtu_is_discarded() {
        let mut fields = vec![0x00, 1, 2, 3, 4, 0, TransmissionMode::Broadcast.to_wire()];
        let oversized = (primitives::BROADCAST_MTU + 1) as u16;
        fields.extend_from_slice(&oversized.to_be_bytes());
        fields.extend(std::iter::repeat(0u8).take(primitives::BROADCAST_MTU + 1));
        assert!(matches!(decode_unidata_request(&fields), DecodeOutcome::Discard(_)));
    }
}
