use std::fmt::{Debug, Formatter};

use crate::addr::{Addr, SeqId};


/// Per-sender table of the highest sequence number accepted *in order, with no earlier gaps*.
///  One byte-sized slot per possible unicast address; slot `i` belongs to address `i + 1`.
///
/// The table itself performs no validation: the invariant that a slot only ever advances by
///  exactly one per accepted message is enforced by [crate::link::context::LinkContext] before
///  calling [AckVector::set]. A snapshot of this table travels in every outbound PDU - that is
///  how acknowledgement state (and thereby gap knowledge) propagates through the session.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AckVector {
    slots: Vec<u8>,
}

impl AckVector {
    pub fn new(max_peers: usize) -> AckVector {
        AckVector {
            slots: vec![0; max_peers],
        }
    }

    pub fn from_slice(slots: &[u8]) -> AckVector {
        AckVector {
            slots: slots.to_vec(),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.slots
    }

    pub fn has_slot(&self, addr: Addr) -> bool {
        self.slot_index(addr).is_some()
    }

    /// The highest contiguously accepted sequence from `addr`, [SeqId::NONE] if nothing was
    ///  accepted yet - or if the address has no slot at all (broadcast / out of range).
    pub fn get(&self, addr: Addr) -> SeqId {
        match self.slot_index(addr) {
            Some(index) => SeqId(self.slots[index]),
            None => SeqId::NONE,
        }
    }

    pub fn set(&mut self, addr: Addr, seq: SeqId) {
        match self.slot_index(addr) {
            Some(index) => self.slots[index] = seq.0,
            None => debug_assert!(false, "setting ack value for slotless address {:?}", addr),
        }
    }

    pub fn snapshot(&self) -> AckVector {
        self.clone()
    }

    fn slot_index(&self, addr: Addr) -> Option<usize> {
        (addr.0 as usize)
            .checked_sub(1)
            .filter(|&index| index < self.slots.len())
    }
}

impl Debug for AckVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AckVector{:?}", self.slots)
    }
}
