//! Non-ARQ C_PDU reassembly table.
//!
//! A `HashMap` bounded to [`NUM_CPDU_SLOTS`](super::primitives::NUM_CPDU_SLOTS)
//! entries gives the sparse-usage behaviour of a 4096-slot table without
//! reserving 4096 buffers up front for links that rarely fill more than a
//! handful at once.

use std::collections::HashMap;

use super::primitives::NUM_CPDU_SLOTS;

struct Slot {
    total_size: u16,
    received: Vec<u8>,
    bitmap: Vec<bool>,
}

impl Slot {
    fn new(total_size: u16) -> Self {
        Self {
            total_size,
            received: vec![0u8; total_size as usize],
            bitmap: vec![false; total_size as usize],
        }
    }

    fn is_complete(&self) -> bool {
        self.bitmap.iter().all(|&b| b)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NonArqError {
    #[error("c_pdu {0} total size mismatch with in-progress reassembly")]
    SizeMismatch(u16),
    #[error("c_pdu {0} segment offset+len exceeds declared total size")]
    OffsetOverflow(u16),
    #[error("no free reassembly slot for c_pdu {0}")]
    TableFull(u16),
}

#[derive(Default)]
pub struct NonArqTable {
    slots: HashMap<u16, Slot>,
}

impl NonArqTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place one segment. Returns `Some(payload)` the instant the C_PDU
    /// becomes complete (and frees the slot), `None` while reassembly is
    /// still in progress.
    pub fn place_segment(
        &mut self,
        c_pdu_id: u16,
        total_size: u16,
        offset: u16,
        segment: &[u8],
    ) -> Result<Option<Vec<u8>>, NonArqError> {
        if !self.slots.contains_key(&c_pdu_id) {
            if self.slots.len() >= NUM_CPDU_SLOTS {
                return Err(NonArqError::TableFull(c_pdu_id));
            }
            self.slots.insert(c_pdu_id, Slot::new(total_size));
        }
        let slot = self.slots.get_mut(&c_pdu_id).expect("just inserted or present");
        if slot.total_size != total_size {
            return Err(NonArqError::SizeMismatch(c_pdu_id));
        }
        let start = offset as usize;
        let end = start + segment.len();
        if end > slot.total_size as usize {
            return Err(NonArqError::OffsetOverflow(c_pdu_id));
        }

        slot.received[start..end].copy_from_slice(segment);
        for bit in &mut slot.bitmap[start..end] {
            *bit = true;
        }

        if slot.is_complete() {
            let slot = self.slots.remove(&c_pdu_id).expect("present");
            Ok(Some(slot.received))
        } else {
            Ok(None)
        }
    }

    pub fn slots_in_use(&self) -> usize {
        self.slots.len()
    }

    /// Drop a slot outright (e.g. on connection close); never an error if
    /// absent.
    pub fn discard(&mut self, c_pdu_id: u16) {
        self.slots.remove(&c_pdu_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_exactly_once_when_all_bytes_received_any_order() {
        let mut table = NonArqTable::new();
        let data = (0u16..2500).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
        let segs = [(800u16, 0u16), (800, 800), (800, 1600), (100, 2400)];

        // last segment first, then the rest — order must not matter.
        let (len, off) = segs[3];
        assert!(table
            .place_segment(42, 2500, off, &data[off as usize..(off + len) as usize])
            .unwrap()
            .is_none());

        let mut delivered = None;
        for &(len, off) in &segs[0..3] {
            let r = table
                .place_segment(42, 2500, off, &data[off as usize..(off + len) as usize])
                .unwrap();
            if r.is_some() {
                delivered = r;
            }
        }
        assert_eq!(delivered, Some(data));
        assert_eq!(table.slots_in_use(), 0);
    }

    #[test]
    fn missing_segment_never_delivers() {
        let mut table = NonArqTable::new();
        let data = vec![0xAB; 800];
        assert!(table.place_segment(1, 2500, 0, &data).unwrap().is_none());
        assert_eq!(table.slots_in_use(), 1);
    }

    #[test]
    fn conflicting_total_size_rejected() {
        let mut table = NonArqTable::new();
        table.place_segment(1, 2500, 0, &[0; 800]).unwrap();
        assert!(matches!(
            table.place_segment(1, 3000, 800, &[0; 800]),
            Err(NonArqError::SizeMismatch(1))
        ));
    }

    #[test]
    fn offset_beyond_total_size_rejected() {
        let mut table = NonArqTable::new();
        assert!(matches!(
            table.place_segment(1, 100, 90, &[0; 50]),
            Err(NonArqError::OffsetOverflow(1))
        ));
    }
}
