use std::fmt::{Debug, Formatter};


/// A single-byte peer address. Address `0` is reserved as the broadcast destination; unicast
///  addresses start at 1 and are handed out externally (address allocation is not a link-layer
///  concern - the first PDU seen from an address implicitly introduces the peer).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Addr(pub u8);

impl Addr {
    pub const BROADCAST: Addr = Addr(0);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl Debug for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_broadcast() {
            write!(f, "@*")
        }
        else {
            write!(f, "@{}", self.0)
        }
    }
}


/// A per-sender sequence number. `0` means 'nothing received from this sender yet', the first
///  actual message has sequence 1, and the counter wraps modulo 256.
///
/// NB: the wrap-around after 255 messages from a single sender is a known boundary of the
///  protocol - sequence comparisons are plain byte comparisons, and a sender exceeding 255
///  messages in one session is outside the supported envelope.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SeqId(pub u8);

impl SeqId {
    pub const NONE: SeqId = SeqId(0);

    pub fn next(&self) -> SeqId {
        SeqId(self.0.wrapping_add(1))
    }
}

impl Debug for SeqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
