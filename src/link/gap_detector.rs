use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::addr::{Addr, SeqId};
use crate::link::ack_vector::AckVector;


/// Key of one acknowledged gap: the first sequence number from `from` that one side of an
///  ack-vector comparison has and the other still lacks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct MissingMessage {
    pub from: Addr,
    pub seq: SeqId,
}


/// Compares the local ack vector against remote snapshots observed in incoming PDUs and keeps
///  a counter of how often each gap has been seen.
///
/// Counting repeated observations instead of reacting to the first sighting damps the response
///  to a single stale or missed scan cycle. The counters cover both directions of the
///  comparison: gaps where the remote side is ahead (messages this node lacks, to be repaired
///  by whoever has them) and gaps where the local side is ahead (messages the observer lacks,
///  which this node can re-advertise).
pub struct GapDetector {
    missing: FxHashMap<MissingMessage, u32>,
}

impl GapDetector {
    pub fn new() -> GapDetector {
        GapDetector {
            missing: FxHashMap::default(),
        }
    }

    /// Compare `local` against a snapshot gossiped by `observer` (`None` for anonymous ack-only
    ///  gossip, which carries no sender address on the wire).
    ///
    /// Tracked gaps that both sides of this comparison have covered are considered filled: they
    ///  are dropped from the counters, and `on_cleared` fires exactly once per such gap. That
    ///  fast path lets the scheduler abort an in-flight retransmission as soon as independent
    ///  gossip shows the gap as already closed.
    pub fn handle(
        &mut self,
        local: &AckVector,
        remote: &AckVector,
        observer: Option<Addr>,
        mut on_cleared: impl FnMut(Addr, SeqId),
    ) {
        let filled = self.missing.keys()
            .filter(|m| local.get(m.from) >= m.seq && remote.get(m.from) >= m.seq)
            .copied()
            .collect::<Vec<_>>();

        for m in filled {
            self.missing.remove(&m);
            debug!("gap {:?} {:?} was filled (observed via {:?})", m.from, m.seq, observer);
            on_cleared(m.from, m.seq);
        }

        let num_slots = std::cmp::min(local.num_slots(), remote.num_slots());
        for index in 0..num_slots {
            let addr = Addr(index as u8 + 1);
            let l = local.get(addr);
            let r = remote.get(addr);
            if l == r {
                continue;
            }

            let gap = MissingMessage {
                from: addr,
                seq: std::cmp::min(l, r).next(),
            };
            let counter = self.missing.entry(gap).or_insert(0);
            *counter += 1;
            trace!("gap {:?} seen {} time(s), local {:?} vs {:?} via {:?}", gap, counter, l, r, observer);
        }
    }

    pub fn missing_counter(&self) -> &FxHashMap<MissingMessage, u32> {
        &self.missing
    }

    /// Forget all tracked gaps without firing cleared-notifications. Called by the periodic
    ///  scheduled tick so that transient, never-repaired gaps are dropped rather than retried
    ///  forever.
    pub fn reset(&mut self) {
        self.missing.clear();
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn missing(from: u8, seq: u8) -> MissingMessage {
        MissingMessage {
            from: Addr(from),
            seq: SeqId(seq),
        }
    }

    fn collect_cleared(cleared: &mut Vec<(Addr, SeqId)>) -> impl FnMut(Addr, SeqId) + '_ {
        |addr, seq| cleared.push((addr, seq))
    }

    #[test]
    fn test_remote_ahead_records_next_missing() {
        let mut detector = GapDetector::new();
        let local = AckVector::from_slice(&[0, 3]);
        let remote = AckVector::from_slice(&[0, 5]);

        detector.handle(&local, &remote, Some(Addr(2)), |_, _| panic!("nothing to clear"));

        assert_eq!(detector.missing_counter().len(), 1);
        assert_eq!(detector.missing_counter().get(&missing(2, 4)), Some(&1));
    }

    #[test]
    fn test_local_ahead_records_what_observer_lacks() {
        let mut detector = GapDetector::new();
        let local = AckVector::from_slice(&[2, 0]);
        let remote = AckVector::from_slice(&[1, 0]);

        detector.handle(&local, &remote, Some(Addr(2)), |_, _| panic!("nothing to clear"));

        assert_eq!(detector.missing_counter().get(&missing(1, 2)), Some(&1));
    }

    #[test]
    fn test_repeated_observations_increment_counter() {
        let mut detector = GapDetector::new();
        let local = AckVector::from_slice(&[0, 3]);
        let remote = AckVector::from_slice(&[0, 5]);

        detector.handle(&local, &remote, Some(Addr(2)), |_, _| {});
        detector.handle(&local, &remote, Some(Addr(3)), |_, _| {});
        detector.handle(&local, &remote, None, |_, _| {});

        assert_eq!(detector.missing_counter().get(&missing(2, 4)), Some(&3));
    }

    #[test]
    fn test_gap_lifecycle_clears_exactly_once() {
        let mut detector = GapDetector::new();
        let remote = AckVector::from_slice(&[0, 5]);

        detector.handle(&AckVector::from_slice(&[0, 3]), &remote, Some(Addr(2)), |_, _| {});
        assert_eq!(detector.missing_counter().get(&missing(2, 4)), Some(&1));

        // seq 4 from peer 2 was accepted locally in the meantime
        let mut cleared = Vec::new();
        detector.handle(&AckVector::from_slice(&[0, 4]), &remote, Some(Addr(2)), collect_cleared(&mut cleared));
        assert_eq!(cleared, vec![(Addr(2), SeqId(4))]);
        assert_eq!(detector.missing_counter().get(&missing(2, 4)), None);
        // the comparison still differs by one, so the next gap takes its place
        assert_eq!(detector.missing_counter().get(&missing(2, 5)), Some(&1));

        // a further comparison must not fire the notification again
        let mut cleared = Vec::new();
        detector.handle(&AckVector::from_slice(&[0, 4]), &remote, Some(Addr(2)), collect_cleared(&mut cleared));
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_gap_not_cleared_while_one_side_lacks_it() {
        let mut detector = GapDetector::new();

        detector.handle(&AckVector::from_slice(&[2]), &AckVector::from_slice(&[1]), Some(Addr(1)), |_, _| {});
        assert_eq!(detector.missing_counter().get(&missing(1, 2)), Some(&1));

        // another observer that is just as far behind: the gap persists
        detector.handle(&AckVector::from_slice(&[2]), &AckVector::from_slice(&[1]), Some(Addr(3)), |_, _| panic!("gap is not filled"));
        assert_eq!(detector.missing_counter().get(&missing(1, 2)), Some(&2));
    }

    #[test]
    fn test_caught_up_observer_clears_gap() {
        let mut detector = GapDetector::new();

        detector.handle(&AckVector::from_slice(&[2]), &AckVector::from_slice(&[1]), Some(Addr(1)), |_, _| {});

        let mut cleared = Vec::new();
        detector.handle(&AckVector::from_slice(&[2]), &AckVector::from_slice(&[2]), Some(Addr(1)), collect_cleared(&mut cleared));
        assert_eq!(cleared, vec![(Addr(1), SeqId(2))]);
        assert!(detector.missing_counter().is_empty());
    }

    #[test]
    fn test_equal_vectors_record_nothing() {
        let mut detector = GapDetector::new();
        let vector = AckVector::from_slice(&[1, 2, 3]);

        detector.handle(&vector, &vector.snapshot(), Some(Addr(1)), |_, _| {});
        assert!(detector.missing_counter().is_empty());
    }

    #[test]
    fn test_reset_is_silent() {
        let mut detector = GapDetector::new();
        detector.handle(&AckVector::from_slice(&[0]), &AckVector::from_slice(&[2]), Some(Addr(1)), |_, _| {});
        assert!(!detector.missing_counter().is_empty());

        detector.reset();
        assert!(detector.missing_counter().is_empty());

        // the cleared-notification must not fire for gaps that were reset, only for filled ones
        detector.handle(&AckVector::from_slice(&[2]), &AckVector::from_slice(&[2]), Some(Addr(1)), |_, _| panic!("reset gaps are forgotten, not cleared"));
    }
}
