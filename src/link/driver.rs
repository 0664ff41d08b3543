use anyhow::anyhow;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::addr::Addr;
use crate::link::context::{LinkContext, NextTick, TickKind};
use crate::pdu::PduCodec;


/// The discrete events that reach the link layer: identifier observations from the scanning
///  transport, and send requests from the application.
#[derive(Debug)]
pub enum LinkEvent {
    Observed(String),
    Send { to: Addr, payload: Bytes },
}


/// Cheaply clonable handle for feeding events into the link's serialized event queue from
///  transport callbacks and application code.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    events: mpsc::Sender<LinkEvent>,
}

impl LinkHandle {
    pub async fn send(&self, to: Addr, payload: Bytes) -> anyhow::Result<()> {
        self.events.send(LinkEvent::Send { to, payload }).await
            .map_err(|_| anyhow!("link event loop has shut down"))
    }

    /// To be called by the transport whenever a peer's identifier shows up in a scan cycle.
    pub async fn observed(&self, identifier: String) -> anyhow::Result<()> {
        self.events.send(LinkEvent::Observed(identifier)).await
            .map_err(|_| anyhow!("link event loop has shut down"))
    }
}

pub fn link_channel(buffer: usize) -> (LinkHandle, mpsc::Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel(buffer);
    (LinkHandle { events: tx }, rx)
}


/// The single-owner event loop around a [LinkContext]: all mutation happens inside this task,
///  one event at a time, so acceptance decisions, gap comparisons and retransmission decisions
///  never interleave.
///
/// The scheduler holds exactly one timer at any time; each processed tick (and each
///  gap-cleared fast path) re-arms it, superseding whatever was pending. The loop terminates
///  when the last [LinkHandle] is dropped.
pub async fn run_link(mut ctx: LinkContext, mut events: mpsc::Receiver<LinkEvent>) {
    let codec = ctx.codec().clone();
    let session_tag = codec.session_tag();

    info!("starting link layer event loop as {:?}", ctx.own_addr());

    let mut next_tick = NextTick {
        kind: TickKind::Scheduled,
        delay: ctx.config().gap_check_interval,
    };
    let mut deadline = Instant::now() + next_tick.delay;

    loop {
        select! {
            _ = sleep_until(deadline) => {
                trace!("{:?} tick", next_tick.kind);
                next_tick = ctx.on_tick(next_tick.kind);
                deadline = Instant::now() + next_tick.delay;
            }
            event = events.recv() => {
                match event {
                    None => {
                        info!("all link handles dropped - shutting down");
                        break;
                    }
                    Some(LinkEvent::Observed(identifier)) => {
                        if !PduCodec::is_valid_pdu(&identifier, session_tag) {
                            trace!("observed identifier from a foreign session or unrelated device - skipping");
                            continue;
                        }
                        match codec.decode(&identifier) {
                            Ok(pdu) => {
                                let outcome = ctx.receive(pdu);
                                if outcome.repeat_superseded {
                                    // the gap this node was repeating got closed by independent
                                    // gossip - re-run the decision now instead of waiting
                                    next_tick = ctx.on_tick(TickKind::Abrupt);
                                    deadline = Instant::now() + next_tick.delay;
                                }
                            }
                            Err(e) => {
                                debug!("observed identifier passed the pre-check but does not decode: {} - skipping", e);
                            }
                        }
                    }
                    Some(LinkEvent::Send { to, payload }) => {
                        if let Err(e) = ctx.send(to, &payload) {
                            warn!("dropping outbound message to {:?}: {}", to, e);
                        }
                    }
                }
            }
        }
    }
}
