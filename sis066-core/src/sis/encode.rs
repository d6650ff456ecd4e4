//! Encoders for the SIS primitives the daemon emits.

use super::primitives::{build_header, primitive, TransmissionMode};

pub fn bind_accepted(sap: u8, mtu: u16) -> Vec<u8> {
    let mtu_bytes = mtu.to_be_bytes();
    let body = [primitive::BIND_ACCEPTED, sap << 4, mtu_bytes[0], mtu_bytes[1]];
    let mut out = build_header(body.len() as u16).to_vec();
    out.extend_from_slice(&body);
    out
}

pub fn bind_rejected(sap: u8) -> Vec<u8> {
    let body = [primitive::BIND_REJECTED, sap << 4];
    let mut out = build_header(body.len() as u16).to_vec();
    out.extend_from_slice(&body);
    out
}

pub fn unbind_indication(sap: u8) -> Vec<u8> {
    let body = [primitive::UNBIND_INDICATION, sap << 4];
    let mut out = build_header(body.len() as u16).to_vec();
    out.extend_from_slice(&body);
    out
}

#[allow(clippy::too_many_arguments)]
pub fn unidata_indication(
    dest_sap: u8,
    src_addr: [u8; 4],
    dest_addr: [u8; 4],
    delivery_mode: u8,
    tx_mode: TransmissionMode,
    payload: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + 1 + 4 + 4 + 1 + 1 + 2 + payload.len());
    body.push(primitive::UNIDATA_INDICATION);
    body.push(dest_sap & 0x0F);
    body.extend_from_slice(&src_addr);
    body.extend_from_slice(&dest_addr);
    body.push(delivery_mode);
    body.push(tx_mode.to_wire());
    body.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    body.extend_from_slice(payload);

    let mut out = build_header(body.len() as u16).to_vec();
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sis::primitives;

    #[test]
    fn bind_accepted_roundtrips_through_peek_header() {
        let wire = bind_accepted(3, 2048);
        let len = primitives::peek_header(&wire).unwrap();
        assert_eq!(wire.len(), primitives::HEADER_LEN + len as usize);
        assert_eq!(wire[5], primitive::BIND_ACCEPTED);
    }
}
