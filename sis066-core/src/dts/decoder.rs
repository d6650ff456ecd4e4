//! Top-level DTS decode entry point: bridges the read engine's byte-driven
//! `need` protocol to the framing/CRC parse in [`super::primitives`].

use crate::decode::DecodeOutcome;

use super::primitives::{self, Frame, ParseError};

/// Inspect `bytes` (everything read so far for the current PDU) and either
/// report how many more bytes are required, or hand back a parsed frame.
pub fn decode_dts(bytes: &[u8]) -> DecodeOutcome<Frame> {
    let Some(total_len) = primitives::declared_len(bytes) else {
        // Not even the framing prefix (preamble..hdr_len byte) has arrived.
        return DecodeOutcome::Need(primitives::MIN_FRAMING_PREFIX.saturating_sub(bytes.len()).max(1));
    };
    if bytes.len() < total_len {
        return DecodeOutcome::Need(total_len - bytes.len());
    }

    match primitives::parse_frame(&bytes[..total_len]) {
        Ok(frame) => DecodeOutcome::Dispatched(Some(frame)),
        // Framing errors and CRC failures are both silent discards on the
        // DTS side; only resource exhaustion at a
        // higher layer ever closes a DTS peer connection.
        Err(ParseError::Framing(reason)) => DecodeOutcome::Discard(reason),
        Err(ParseError::CrcMismatch(reason)) => DecodeOutcome::Discard(reason),
    }
}

/// The self-declared total length of the PDU currently being read, as soon
/// as it is computable — used by the read engine's overflow-split handling.
pub fn declared_len(bytes: &[u8]) -> Option<usize> {
    primitives::declared_len(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::dts::primitives::{build_frame, d_type};

    #[test]
    fn needs_more_bytes_before_framing_prefix_complete() {
        assert!(matches!(decode_dts(&[0x90, 0xEB]), DecodeOutcome::Need(_)));
    }

    #[test]
    fn full_frame_dispatches() {
        let src = Address::new(vec![1]).unwrap();
        let dst = Address::new(vec![2]).unwrap();
        let wire = build_frame(d_type::RESET, 0, 0, &src, &dst, &[0], &[]);
        assert!(matches!(decode_dts(&wire), DecodeOutcome::Dispatched(Some(_))));
    }

    #[test]
    fn truncated_frame_requests_exact_remainder() {
        let src = Address::new(vec![1]).unwrap();
        let dst = Address::new(vec![2]).unwrap();
        let wire = build_frame(d_type::NON_ARQ, 0, 0, &src, &dst, &[0u8; 8], &vec![7u8; 50]);
        let partial = &wire[..wire.len() - 3];
        match decode_dts(partial) {
            DecodeOutcome::Need(n) => assert_eq!(n, 3),
            _ => panic!("expected Need(3)"),
        }
    }
}
