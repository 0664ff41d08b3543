use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::addr::{Addr, SeqId};
use crate::config::LinkConfig;
use crate::link::ack_vector::AckVector;
use crate::link::gap_detector::{GapDetector, MissingMessage};
use crate::link::peer_store::{LinkMessage, PeerStore};
use crate::pdu::{Pdu, PduCodec};
use crate::transport::{Transmitter, UpperLayerSink};
use crate::util::random::Random;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TickKind {
    /// fixed-cadence tick that samples the miss counters afresh (and resets them)
    Scheduled,
    /// retry of a deferred decision, or an immediate re-evaluation after a gap was cleared -
    ///  works on the counters as they are
    Abrupt,
}

/// What the scheduler wants next: arming this tick must supersede any previously pending tick,
///  so that at most one timer is outstanding at a time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NextTick {
    pub kind: TickKind,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ReceiveOutcome {
    /// true if the PDU was newly accepted into the session (not necessarily addressed to this
    ///  node)
    pub newly_accepted: bool,
    /// true if the gap this node is currently re-advertising a REPEAT for was just reported as
    ///  filled - the caller should re-run the scheduler decision immediately instead of letting
    ///  the stale repeat linger until the next scheduled tick
    pub repeat_superseded: bool,
}


/// The session state of the link layer: ack bookkeeping, per-peer message logs, gap tracking
///  and the retransmission scheduler. One instance per session, owned by a single logical
///  owner - all entry points take `&mut self`, and the type exposes no concurrent mutation
///  seam (see [crate::link::driver] for the serialized event queue around it).
pub struct LinkContext {
    config: LinkConfig,
    codec: PduCodec,
    ack: AckVector,
    store: PeerStore,
    gaps: GapDetector,
    random: Box<dyn Random>,
    transmitter: Box<dyn Transmitter>,
    upper_layer: Box<dyn UpperLayerSink>,

    /// the PDU this node currently advertises, i.e. the last one handed to the transmitter
    current_pdu: Option<Pdu>,
    last_own_message: Option<Instant>,
}

impl LinkContext {
    pub fn new(
        config: LinkConfig,
        random: Box<dyn Random>,
        transmitter: Box<dyn Transmitter>,
        upper_layer: Box<dyn UpperLayerSink>,
    ) -> anyhow::Result<LinkContext> {
        config.validate()?;

        Ok(LinkContext {
            codec: PduCodec::new(&config),
            ack: AckVector::new(config.max_peers),
            store: PeerStore::new(),
            gaps: GapDetector::new(),
            random,
            transmitter,
            upper_layer,
            current_pdu: None,
            last_own_message: None,
            config,
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn codec(&self) -> &PduCodec {
        &self.codec
    }

    pub fn own_addr(&self) -> Addr {
        self.config.own_addr
    }

    /// highest contiguously accepted sequence from `addr`
    pub fn ack_value(&self, addr: Addr) -> SeqId {
        self.ack.get(addr)
    }

    pub fn current_pdu(&self) -> Option<&Pdu> {
        self.current_pdu.as_ref()
    }

    #[cfg(test)]
    pub fn gap_detector(&self) -> &GapDetector {
        &self.gaps
    }

    /// Inbound entry point: update gap tracking from the PDU's embedded ack snapshot and - for
    ///  MESSAGE and REPEAT - attempt strictly-in-order acceptance. Anything that is not exactly
    ///  the next expected sequence from its sender is dropped silently; retransmission is the
    ///  sending side's job, driven by the gap detectors across the session.
    pub fn receive(&mut self, pdu: Pdu) -> ReceiveOutcome {
        let repeat_superseded = match &pdu {
            Pdu::Message { from, ack, .. } => self.handle_gaps(ack, Some(*from)),
            Pdu::Repeat { repeater, ack, .. } => self.handle_gaps(ack, Some(*repeater)),
            Pdu::AckChanged { ack } => {
                // ack-only gossip: gap comparison, but never data acceptance
                let superseded = self.handle_gaps(ack, None);
                return ReceiveOutcome {
                    newly_accepted: false,
                    repeat_superseded: superseded,
                };
            }
        };

        let (from, to, seq, payload) = match pdu {
            Pdu::Message { from, to, seq, payload, .. } => (from, to, seq, payload),
            Pdu::Repeat { from, to, seq, payload, .. } => (from, to, seq, payload),
            Pdu::AckChanged { .. } => unreachable!("handled above"),
        };

        if !self.ack.has_slot(from) {
            trace!("PDU from {:?} which has no ack slot - dropping", from);
            return ReceiveOutcome { newly_accepted: false, repeat_superseded };
        }

        let expected = self.ack.get(from).next();
        if seq != expected {
            trace!("PDU {:?} from {:?} is out of order or redundant (expected {:?}) - dropping", seq, from, expected);
            return ReceiveOutcome { newly_accepted: false, repeat_superseded };
        }

        self.store.append(LinkMessage {
            from,
            to,
            seq,
            payload: payload.clone(),
        });
        self.ack.set(from, seq);
        debug!("accepted {:?} from {:?}", seq, from);

        // gossip the updated acknowledgement state to the session
        self.advertise(Pdu::AckChanged {
            ack: self.ack.snapshot(),
        });

        if to.is_broadcast() || to == self.config.own_addr {
            self.upper_layer.on_message_delivered(from, &payload);
        }

        ReceiveOutcome {
            newly_accepted: true,
            repeat_superseded,
        }
    }

    /// Local-origin send: allocate the next own sequence number, record the message for future
    ///  retransmission and advertise it. There is no network failure to surface - advertisement
    ///  is fire-and-forget - but a payload exceeding the length budget is rejected up front,
    ///  before any state changes.
    pub fn send(&mut self, to: Addr, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > self.codec.max_payload_len() {
            bail!("payload of {} bytes exceeds the budget of {} under the advertisement length cap",
                payload.len(), self.codec.max_payload_len());
        }

        let own = self.config.own_addr;
        let seq = self.ack.get(own).next();
        self.ack.set(own, seq);

        let payload = Bytes::copy_from_slice(payload);
        self.store.append(LinkMessage {
            from: own,
            to,
            seq,
            payload: payload.clone(),
        });

        self.last_own_message = Some(Instant::now());
        trace!("sending own message {:?} to {:?}", seq, to);
        self.advertise(Pdu::Message {
            from: own,
            to,
            seq,
            ack: self.ack.snapshot(),
            payload,
        });
        Ok(())
    }

    /// The retransmission scheduler. Samples one tracked gap at random - uniform selection
    ///  spreads the repair load across observers instead of having every node chase the same
    ///  gap in lockstep. If this node's own MESSAGE was advertised too recently, the decision
    ///  is deferred to an abrupt tick after the remaining wait (replacing the advertisement too
    ///  quickly would make peers' scan cycles miss it entirely).
    pub fn on_tick(&mut self, kind: TickKind) -> NextTick {
        let picked = {
            let counter = self.gaps.missing_counter();
            if counter.is_empty() {
                None
            }
            else {
                let index = self.random.gen_usize_range(0..counter.len());
                counter.keys().nth(index).copied()
            }
        };

        let mut deferral = None;
        if let Some(missing) = picked {
            deferral = match self.last_own_message {
                Some(t) => self.config.min_own_message_spacing
                    .checked_sub(t.elapsed())
                    .filter(|remaining| !remaining.is_zero()),
                None => None,
            };

            match deferral {
                Some(remaining) => {
                    trace!("own message advertised too recently - deferring repair of {:?} by {:?}", missing, remaining);
                }
                None => self.repeat(missing),
            }
        }

        // an abrupt tick retries an earlier decision rather than opening a fresh sampling
        // window, and a deferring tick must leave the counters for its abrupt retry
        if kind == TickKind::Scheduled && deferral.is_none() {
            self.gaps.reset();
        }

        match deferral {
            Some(delay) => NextTick { kind: TickKind::Abrupt, delay },
            None => NextTick { kind: TickKind::Scheduled, delay: self.config.gap_check_interval },
        }
    }

    fn repeat(&mut self, missing: MissingMessage) {
        let message = match self.store.get(missing.from, missing.seq) {
            Some(message) => message.clone(),
            None => {
                // either this node is itself behind on this gap (someone else must repair it),
                // or the gap accounting is broken
                debug!("{:?} {:?} is not in the local store - cannot assert a repeat", missing.from, missing.seq);
                return;
            }
        };

        debug!("re-advertising {:?} {:?} to close an acknowledged gap", missing.from, missing.seq);
        self.advertise(Pdu::Repeat {
            from: message.from,
            to: message.to,
            seq: message.seq,
            repeater: self.config.own_addr,
            ack: self.ack.snapshot(),
            payload: message.payload,
        });
    }

    fn handle_gaps(&mut self, remote: &AckVector, observer: Option<Addr>) -> bool {
        let current_repeat = match &self.current_pdu {
            Some(Pdu::Repeat { from, seq, .. }) => Some((*from, *seq)),
            _ => None,
        };

        let mut superseded = false;
        self.gaps.handle(&self.ack, remote, observer, |addr, seq| {
            if current_repeat == Some((addr, seq)) {
                superseded = true;
            }
        });
        superseded
    }

    fn advertise(&mut self, pdu: Pdu) {
        match self.codec.encode(&pdu) {
            Ok(identifier) => {
                self.transmitter.advertise(&identifier);
                self.current_pdu = Some(pdu);
            }
            Err(e) => {
                // all outbound PDUs are built within the length budget, so this is a defect -
                // skip the advertisement rather than tearing down the session
                error!("failed to encode outbound PDU: {}", e);
            }
        }
    }
}
