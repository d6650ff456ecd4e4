//! SIS↔DTS bridge: a small stateless mapper between the client-facing
//! SIS primitives and the peer-facing DTS D_PDUs.

use crate::address::Address;
use crate::dts::primitives::{self as dts_primitives, d_type};
use crate::sis::{encode, TransmissionMode};

/// Map a SIS primitive's 4 raw destination-address bytes onto a DTS nibble
/// address.
///
/// **Design decision (see DESIGN.md):** nothing states how the SIS
/// primitive's fixed 4-byte node address
/// maps onto the DTS header's variable-length nibble address. This takes
/// the low nibble of each byte, producing a 4-nibble `Address` — short
/// enough to always satisfy the `1..=7` length invariant, and stable
/// (every SIS address maps to exactly one DTS address) without needing a
/// lookup table.
pub fn sis_addr_to_dts(addr: [u8; 4]) -> Address {
    let nibbles = addr.iter().map(|b| b & 0x0F).collect();
    Address::new(nibbles).expect("4 nibbles is always within 1..=7")
}

/// The inverse of [`sis_addr_to_dts`] for the common case of a 4-nibble
/// address; addresses of other lengths (reachable only via a DTS peer that
/// is not itself speaking through this bridge) zero-pad/truncate to 4 bytes.
pub fn dts_addr_to_sis(addr: &Address) -> [u8; 4] {
    let mut out = [0u8; 4];
    for (slot, &nibble) in out.iter_mut().zip(addr.nibbles()) {
        *slot = nibble;
    }
    out
}

/// Split a U_PDU into Non-ARQ segments no larger than `max_segment`,
/// returning `(offset, bytes)` pairs in transmit order.
pub fn segment_for_nonarq(payload: &[u8], max_segment: usize) -> Vec<(u16, &[u8])> {
    payload
        .chunks(max_segment)
        .scan(0u16, |offset, chunk| {
            let start = *offset;
            *offset += chunk.len() as u16;
            Some((start, chunk))
        })
        .collect()
}

/// Build the wire frames for one Non-ARQ C_PDU transmission.
pub fn build_nonarq_frames(
    c_pdu_id: u16,
    payload: &[u8],
    max_segment: usize,
    rx_window_hint: u16,
    src: &Address,
    dst: &Address,
) -> Vec<Vec<u8>> {
    let segments = segment_for_nonarq(payload, max_segment);
    segments
        .into_iter()
        .map(|(offset, chunk)| {
            let mut control = vec![0u8; 8];
            control[0..2].copy_from_slice(&(c_pdu_id & 0x0FFF).to_be_bytes());
            control[2..4].copy_from_slice(&(payload.len() as u16).to_be_bytes());
            control[4..6].copy_from_slice(&offset.to_be_bytes());
            control[6..8].copy_from_slice(&rx_window_hint.to_be_bytes());
            dts_primitives::build_frame(d_type::NON_ARQ, 0, 0, src, dst, &control, chunk)
        })
        .collect()
}

/// Encode a reassembled C_PDU as a SIS UNIDATA_INDICATION for delivery to
/// its bound SAP.
#[allow(clippy::too_many_arguments)]
pub fn build_unidata_indication(
    dest_sap: u8,
    src_addr: [u8; 4],
    dest_addr: [u8; 4],
    delivery_mode: u8,
    tx_mode: TransmissionMode,
    payload: &[u8],
) -> Vec<u8> {
    encode::unidata_indication(dest_sap, src_addr, dest_addr, delivery_mode, tx_mode, payload)
}

/// Admission checks before a U_PDU is allowed onto the DTS transmit side:
/// the payload must fit the negotiated MTU for the requested transmission
/// mode (and, for broadcast, the hard C_PDU ceiling).
pub fn admit(payload_len: usize, mtu: u16, tx_mode: TransmissionMode) -> Result<(), &'static str> {
    match tx_mode {
        TransmissionMode::Broadcast if payload_len > dts_primitives::MAX_CPDU => {
            Err("broadcast payload exceeds c_pdu maximum")
        }
        _ if payload_len > mtu as usize => Err("payload exceeds negotiated mtu"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_cover_payload_without_gaps_or_overlap() {
        let payload = vec![0u8; 2500];
        let segs = segment_for_nonarq(&payload, 800);
        assert_eq!(segs.len(), 4);
        let mut expect_offset = 0u16;
        for (offset, chunk) in &segs {
            assert_eq!(*offset, expect_offset);
            expect_offset += chunk.len() as u16;
        }
        assert_eq!(expect_offset as usize, payload.len());
    }

    #[test]
    fn sis_dts_address_roundtrips_through_low_nibbles() {
        let sis = [0x01, 0x02, 0x0A, 0x0F];
        let dts = sis_addr_to_dts(sis);
        assert_eq!(dts.nibbles(), &[1, 2, 0x0A, 0x0F]);
        assert_eq!(dts_addr_to_sis(&dts), sis);
    }
}
