use std::time::Duration;
use anyhow::bail;

use crate::addr::Addr;


/// Static per-session configuration of the link layer. All cooperating peers must agree on
///  `session_tag` and `max_peers` - both are baked into the wire format.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Coarse admission filter: PDUs with a different tag belong to an unrelated session on the
    ///  shared medium and are invisible to this protocol instance.
    pub session_tag: u8,

    /// This node's own address, fixed for the session lifetime. Must be a valid unicast address,
    ///  i.e. in `1..=max_peers`.
    pub own_addr: Addr,

    /// Number of address slots in the ack vector. Every PDU carries one ack byte per slot, so
    ///  this value directly eats into the payload budget.
    pub max_peers: usize,

    /// Hard length cap of the advertised identifier string, imposed by the underlying discovery
    ///  transport. The default of 248 is the usable length of a Bluetooth device name.
    pub max_advertisement_len: usize,

    /// Interval of the periodic scheduled tick that inspects the gap detector's miss counters
    ///  and decides whether to re-advertise an old message.
    pub gap_check_interval: Duration,

    /// Minimum time this node's own advertised MESSAGE must stay visible before the scheduler
    ///  is allowed to replace it with a repair. Re-advertising too quickly means peers' scan
    ///  cycles miss intermediate states entirely.
    pub min_own_message_spacing: Duration,
}

impl LinkConfig {
    pub fn new(session_tag: u8, own_addr: Addr) -> LinkConfig {
        LinkConfig {
            session_tag,
            own_addr,
            max_peers: 16,
            max_advertisement_len: 248,
            gap_check_interval: Duration::from_secs(5),
            min_own_message_spacing: Duration::from_millis(500),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.own_addr.is_broadcast() {
            bail!("own address must not be the broadcast address");
        }
        if self.max_peers == 0 || self.max_peers > 255 {
            bail!("max_peers must be in 1..=255");
        }
        if self.own_addr.0 as usize > self.max_peers {
            bail!("own address {:?} has no slot in an ack vector of {} peers", self.own_addr, self.max_peers);
        }
        // fixed header of a REPEAT plus at least one payload byte must fit under the cap
        if self.max_advertisement_len < 2 + self.max_peers + 4 + 1 + 1 {
            bail!("advertisement length cap of {} is too small for {} peers", self.max_advertisement_len, self.max_peers);
        }
        Ok(())
    }
}
