use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::addr::{Addr, SeqId};


/// One accepted link-layer message, owned by the sending peer's log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LinkMessage {
    pub from: Addr,
    pub to: Addr,
    pub seq: SeqId,
    pub payload: Bytes,
}


/// Append-only log of the messages accepted from one peer, indexed by sequence number for O(1)
///  retransmission lookup.
#[derive(Debug)]
pub struct PeerLog {
    addr: Addr,
    messages: FxHashMap<SeqId, LinkMessage>,
}

impl PeerLog {
    fn new(addr: Addr) -> PeerLog {
        PeerLog {
            addr,
            messages: FxHashMap::default(),
        }
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, seq: SeqId) -> Option<&LinkMessage> {
        self.messages.get(&seq)
    }

    fn append(&mut self, message: LinkMessage) {
        self.messages.insert(message.seq, message);
    }
}


/// Per-peer message logs, keyed by sender address. Peers are never pre-registered - the first
///  accepted PDU from an address lazily creates its log.
#[derive(Debug, Default)]
pub struct PeerStore {
    peers: FxHashMap<Addr, PeerLog>,
}

impl PeerStore {
    pub fn new() -> PeerStore {
        PeerStore::default()
    }

    pub fn get_or_create_peer(&mut self, addr: Addr) -> &mut PeerLog {
        self.peers
            .entry(addr)
            .or_insert_with(|| PeerLog::new(addr))
    }

    pub fn append(&mut self, message: LinkMessage) {
        self.get_or_create_peer(message.from).append(message);
    }

    pub fn get(&self, addr: Addr, seq: SeqId) -> Option<&LinkMessage> {
        self.peers
            .get(&addr)
            .and_then(|peer| peer.get(seq))
    }
}
