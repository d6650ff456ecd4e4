//! The SAP (Service Access Point) table: the SIS engine's binding registry.
//!
//! A fixed array of 16 entries, each bound to at most one client connection
//! at a time. Guarded by a single short-critical-section `Mutex`, consistent
//! with the rest of this codebase's locking style.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::pdu::PduHandle;

pub const NUM_SAPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SapBinding {
    pub connection_id: u64,
    pub rank: u8,
    pub service_type: u16,
}

/// The sending half of a connection's inbound delivery channel, as seen by
/// another worker delivering a reassembled C_PDU to this SAP's owner.
pub type DeliverySender = mpsc::Sender<PduHandle>;

struct SapEntry {
    binding: Option<SapBinding>,
    sender: Option<DeliverySender>,
}

pub struct SapTable {
    entries: Mutex<[SapEntry; NUM_SAPS]>,
}

impl Default for SapTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SapError {
    #[error("sap {0} out of range 0..{NUM_SAPS}")]
    OutOfRange(u8),
    #[error("sap {0} already bound")]
    AlreadyBound(u8),
    #[error("sap {0} not bound")]
    NotBound(u8),
}

impl SapTable {
    pub fn new() -> Self {
        Self { entries: Mutex::new(std::array::from_fn(|_| SapEntry { binding: None, sender: None })) }
    }

    /// Claim SAP `sap` for `connection_id`. Fails if out of range or
    /// already bound — STANAG 5066 allows at most one bound connection per
    /// SAP.
    pub fn bind(
        &self,
        sap: u8,
        connection_id: u64,
        rank: u8,
        service_type: u16,
        sender: DeliverySender,
    ) -> Result<(), SapError> {
        let idx = sap as usize;
        if idx >= NUM_SAPS {
            return Err(SapError::OutOfRange(sap));
        }
        let mut entries = self.entries.lock().expect("sap table poisoned");
        if entries[idx].binding.is_some() {
            return Err(SapError::AlreadyBound(sap));
        }
        entries[idx].binding = Some(SapBinding { connection_id, rank, service_type });
        entries[idx].sender = Some(sender);
        Ok(())
    }

    /// Release SAP `sap`, but only if it is currently bound to
    /// `connection_id` (prevents one connection from unbinding another's
    /// SAP).
    pub fn unbind(&self, sap: u8, connection_id: u64) -> Result<(), SapError> {
        let idx = sap as usize;
        if idx >= NUM_SAPS {
            return Err(SapError::OutOfRange(sap));
        }
        let mut entries = self.entries.lock().expect("sap table poisoned");
        match &entries[idx].binding {
            Some(b) if b.connection_id == connection_id => {
                entries[idx].binding = None;
                entries[idx].sender = None;
                Ok(())
            }
            Some(_) => Err(SapError::NotBound(sap)),
            None => Err(SapError::NotBound(sap)),
        }
    }

    /// Release whatever SAP `connection_id` holds, if any — called when a
    /// client connection closes without an explicit UNBIND.
    pub fn release_connection(&self, connection_id: u64) {
        let mut entries = self.entries.lock().expect("sap table poisoned");
        for entry in entries.iter_mut() {
            if entry.binding.map(|b| b.connection_id) == Some(connection_id) {
                entry.binding = None;
                entry.sender = None;
            }
        }
    }

    pub fn binding(&self, sap: u8) -> Option<SapBinding> {
        let idx = sap as usize;
        if idx >= NUM_SAPS {
            return None;
        }
        self.entries.lock().expect("sap table poisoned")[idx].binding
    }

    /// Look up the delivery channel for a bound SAP, for handing a
    /// reassembled C_PDU to its owning connection.
    pub fn sender(&self, sap: u8) -> Option<DeliverySender> {
        let idx = sap as usize;
        if idx >= NUM_SAPS {
            return None;
        }
        self.entries.lock().expect("sap table poisoned")[idx].sender.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> DeliverySender {
        mpsc::channel(1).0
    }

    #[test]
    fn bind_then_rebind_is_rejected() {
        let table = SapTable::new();
        table.bind(3, 1, 0, 0, sender()).unwrap();
        assert!(matches!(table.bind(3, 2, 0, 0, sender()), Err(SapError::AlreadyBound(3))));
    }

    #[test]
    fn out_of_range_sap_rejected() {
        let table = SapTable::new();
        assert!(matches!(table.bind(16, 1, 0, 0, sender()), Err(SapError::OutOfRange(16))));
    }

    #[test]
    fn unbind_by_non_owner_rejected() {
        let table = SapTable::new();
        table.bind(5, 1, 0, 0, sender()).unwrap();
        assert!(table.unbind(5, 2).is_err());
        assert!(table.unbind(5, 1).is_ok());
        assert!(table.binding(5).is_none());
    }

    #[test]
    fn release_connection_frees_its_sap() {
        let table = SapTable::new();
        table.bind(7, 42, 0, 0, sender()).unwrap();
        table.release_connection(42);
        assert!(table.binding(7).is_none());
    }
}
