//! The shared decode-outcome vocabulary both protocol decoders (SIS, DTS)
//! speak, and the read engine consumes.
//!
//! Instead of an integer sentinel a caller must remember to check, every
//! decode attempt returns one of four explicit outcomes.

/// The result of handing a registered decoder the bytes currently available
/// for one PDU.
pub enum DecodeOutcome<E> {
    /// Not enough bytes yet; the read engine should keep reading and retry
    /// once at least this many additional bytes have arrived.
    Need(usize),
    /// The PDU was fully parsed. `Some(event)` carries the application-level
    /// event the bridge or SAP table should act on; `None` means the
    /// PDU was self-contained control traffic (e.g. a bare ACK) with nothing
    /// further to dispatch. Either way the PDU is fully consumed and can be
    /// released.
    Dispatched(Option<E>),
    /// A validation error: log and drop this PDU, but the
    /// connection survives.
    Discard(&'static str),
    /// A framing error on a connection where that is fatal:
    /// close the connection.
    Close(&'static str),
    /// A validation error on a connection where the protocol defines a
    /// rejection reply (e.g. a malformed BIND_REQUEST): dispatch the
    /// rejection event so it reaches the client, then close the connection
    /// once it has been queued for write.
    CloseAfterDispatch(Option<E>, &'static str),
}

impl<E> DecodeOutcome<E> {
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            DecodeOutcome::Discard(r) | DecodeOutcome::Close(r) | DecodeOutcome::CloseAfterDispatch(_, r) => Some(r),
            _ => None,
        }
    }
}
