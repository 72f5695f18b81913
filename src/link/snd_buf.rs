use std::collections::BTreeMap;

use crate::utils::{ts_diff, Seq32};

use super::segment::{Segment, SegmentPool};

/// In-flight window: segments released to the wire, awaiting acknowledgement.
///
/// Ordered by `sn`; `una` is the smallest unacked sequence number (or `nxt`
/// when empty), `nxt` the next to assign. Everything in the map lies in
/// `[una, nxt)`.
pub(crate) struct SndBuf {
    segments: BTreeMap<Seq32, Segment>,
    una: Seq32,
    nxt: Seq32,
}

impl SndBuf {
    fn check_rep(&self) {
        assert!(self.una <= self.nxt);
        for (&sn, seg) in &self.segments {
            assert_eq!(sn, seg.sn);
            assert!(self.una <= sn && sn < self.nxt);
        }
    }

    #[must_use]
    pub fn new() -> Self {
        Self::with_start(Seq32::from_u32(0))
    }

    #[must_use]
    pub fn with_start(start: Seq32) -> Self {
        let this = SndBuf {
            segments: BTreeMap::new(),
            una: start,
            nxt: start,
        };
        this.check_rep();
        this
    }

    #[must_use]
    #[inline]
    pub fn una(&self) -> Seq32 {
        self.una
    }

    #[must_use]
    #[inline]
    pub fn nxt(&self) -> Seq32 {
        self.nxt
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Count of sequence numbers on the wire, `nxt - una`.
    #[must_use]
    #[inline]
    pub fn inflight(&self) -> u32 {
        self.nxt.sub(self.una)
    }

    /// Registers a promoted segment, assigning it the next sequence number.
    pub fn push(&mut self, mut seg: Segment) -> Seq32 {
        let sn = self.nxt;
        seg.sn = sn;
        self.segments.insert(sn, seg);
        self.nxt.increment();
        self.check_rep();
        sn
    }

    /// Selective ack: removes the matching segment if it is still in flight.
    pub fn ack(&mut self, sn: Seq32) -> Option<Segment> {
        if sn.diff(self.una) < 0 || sn.diff(self.nxt) >= 0 {
            return None;
        }
        let removed = self.segments.remove(&sn);
        self.check_rep();
        removed
    }

    /// Cumulative ack: drops every segment with `sn < una`.
    pub fn ack_before(&mut self, una: Seq32, pool: &mut SegmentPool) {
        let mut acked = Vec::new();
        for &sn in self.segments.keys() {
            if sn.diff(una) < 0 {
                acked.push(sn);
            } else {
                break;
            }
        }
        for sn in acked {
            let seg = self.segments.remove(&sn).unwrap();
            pool.put(seg);
        }
        self.check_rep();
    }

    /// Re-anchors `una` to the head of the window.
    pub fn shrink(&mut self) {
        self.una = match self.segments.keys().next() {
            Some(&sn) => sn,
            None => self.nxt,
        };
        self.check_rep();
    }

    /// Skip pass after a datagram: every segment older than the highest ack
    /// seen, whose send time also precedes it, was skipped once more.
    pub fn mark_skips(&mut self, maxack: Seq32, latest_ts: u32) {
        for (&sn, seg) in self.segments.iter_mut() {
            if sn.diff(maxack) >= 0 {
                break;
            }
            if ts_diff(latest_ts, seg.ts) >= 0 {
                seg.fastack += 1;
            }
        }
    }

    /// Signed delay until the earliest retransmission deadline, if any.
    #[must_use]
    pub fn min_resend_delta(&self, current: u32) -> Option<i32> {
        self.segments
            .values()
            .map(|seg| ts_diff(seg.resendts, current))
            .min()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segments.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_one(buf: &mut SndBuf) -> Seq32 {
        buf.push(Segment::new())
    }

    #[test]
    fn push_assigns_consecutive_sns() {
        let mut buf = SndBuf::new();
        assert_eq!(push_one(&mut buf).to_u32(), 0);
        assert_eq!(push_one(&mut buf).to_u32(), 1);
        assert_eq!(buf.inflight(), 2);
        assert_eq!(buf.una().to_u32(), 0);
        assert_eq!(buf.nxt().to_u32(), 2);
    }

    #[test]
    fn ack_and_shrink() {
        let mut buf = SndBuf::new();
        for _ in 0..3 {
            push_one(&mut buf);
        }
        assert!(buf.ack(Seq32::from_u32(0)).is_some());
        buf.shrink();
        assert_eq!(buf.una().to_u32(), 1);
        // acking again is a no-op
        assert!(buf.ack(Seq32::from_u32(0)).is_none());
        // out-of-range acks are ignored
        assert!(buf.ack(Seq32::from_u32(9)).is_none());
    }

    #[test]
    fn shrink_on_empty_tracks_nxt() {
        let mut buf = SndBuf::new();
        push_one(&mut buf);
        assert!(buf.ack(Seq32::from_u32(0)).is_some());
        buf.shrink();
        assert_eq!(buf.una(), buf.nxt());
        assert_eq!(buf.inflight(), 0);
    }

    #[test]
    fn ack_before_truncates() {
        let mut buf = SndBuf::new();
        let mut pool = SegmentPool::new(8);
        for _ in 0..4 {
            push_one(&mut buf);
        }
        buf.ack_before(Seq32::from_u32(2), &mut pool);
        buf.shrink();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.una().to_u32(), 2);
    }

    #[test]
    fn mark_skips_double_gate() {
        let mut buf = SndBuf::new();
        for ts in [10, 20, 30] {
            let mut seg = Segment::new();
            seg.ts = ts;
            buf.push(seg);
        }
        // maxack 2 and ack timestamp 20: sn 0 (ts 10) and sn 1 (ts 20) were
        // skipped, sn 2 is the ack itself
        buf.mark_skips(Seq32::from_u32(2), 20);
        let skips: Vec<u32> = buf.iter_mut().map(|seg| seg.fastack).collect();
        assert_eq!(skips, vec![1, 1, 0]);

        // an ack whose timestamp is older than the segment does not count
        buf.mark_skips(Seq32::from_u32(2), 15);
        let skips: Vec<u32> = buf.iter_mut().map(|seg| seg.fastack).collect();
        assert_eq!(skips, vec![2, 1, 0]);
    }

    #[test]
    fn min_resend_delta_picks_earliest() {
        let mut buf = SndBuf::new();
        for resendts in [500, 300, 400] {
            let mut seg = Segment::new();
            seg.resendts = resendts;
            buf.push(seg);
        }
        assert_eq!(buf.min_resend_delta(250), Some(50));
        assert_eq!(buf.min_resend_delta(350), Some(-50));
        assert_eq!(SndBuf::new().min_resend_delta(0), None);
    }

    #[test]
    fn wraparound_window() {
        let mut buf = SndBuf::with_start(Seq32::from_u32(u32::MAX));
        let a = push_one(&mut buf);
        let b = push_one(&mut buf);
        assert_eq!(a.to_u32(), u32::MAX);
        assert_eq!(b.to_u32(), 0);
        assert_eq!(buf.inflight(), 2);
        assert!(buf.ack(a).is_some());
        buf.shrink();
        assert_eq!(buf.una().to_u32(), 0);
    }
}
