use std::collections::{BTreeMap, VecDeque};

use crate::utils::Seq32;

use super::segment::{Segment, SegmentPool};

/// Where an arriving sequence number falls relative to the receive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// In window, new, and there is room: store it.
    Fits,
    /// In window but already buffered; the copy is dropped.
    Duplicate,
    /// Before `rcv_nxt`: already delivered (or deliverable), drop the copy.
    TooLate,
    /// At or past `rcv_nxt + wnd`: the peer overran the window, drop.
    TooEarly,
    /// In window but the admission bound is exhausted; drop without acking
    /// so the peer retransmits once the application drains the queue.
    NoRoom,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PeekError {
    NoData,
    FragmentIncomplete,
}

/// Receive side: reorder buffer plus the in-order ready queue.
///
/// `buf` holds out-of-order segments in `[nxt, nxt + wnd)`; `queue` holds the
/// contiguous run that ended at `nxt`, ready for reassembly. Together they
/// never hold more than `wnd` segments.
pub(crate) struct RcvBuf {
    buf: BTreeMap<Seq32, Segment>,
    queue: VecDeque<Segment>,
    nxt: Seq32,
    wnd: u16,
}

impl RcvBuf {
    fn check_rep(&self) {
        assert!(self.buf.len() + self.queue.len() <= self.wnd as usize);
        let end = self.nxt.add(self.wnd as u32);
        for (&sn, seg) in &self.buf {
            assert_eq!(sn, seg.sn);
            assert!(self.nxt <= sn && sn < end);
        }
    }

    #[must_use]
    pub fn new(wnd: u16) -> Self {
        Self::with_start(Seq32::from_u32(0), wnd)
    }

    #[must_use]
    pub fn with_start(start: Seq32, wnd: u16) -> Self {
        let this = RcvBuf {
            buf: BTreeMap::new(),
            queue: VecDeque::new(),
            nxt: start,
            wnd,
        };
        this.check_rep();
        this
    }

    #[must_use]
    #[inline]
    pub fn nxt(&self) -> Seq32 {
        self.nxt
    }

    #[must_use]
    #[inline]
    pub fn wnd(&self) -> u16 {
        self.wnd
    }

    #[inline]
    pub fn set_wnd(&mut self, wnd: u16) {
        self.wnd = wnd;
    }

    #[must_use]
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Free receive slots to advertise to the peer.
    #[must_use]
    pub fn unused(&self) -> u16 {
        if self.queue.len() < self.wnd as usize {
            self.wnd - self.queue.len() as u16
        } else {
            0
        }
    }

    #[must_use]
    pub fn placement(&self, sn: Seq32) -> Placement {
        if sn.diff(self.nxt) < 0 {
            Placement::TooLate
        } else if sn.diff(self.nxt.add(self.wnd as u32)) >= 0 {
            Placement::TooEarly
        } else if self.buf.contains_key(&sn) {
            Placement::Duplicate
        } else if self.buf.len() + self.queue.len() >= self.wnd as usize {
            Placement::NoRoom
        } else {
            Placement::Fits
        }
    }

    /// Stores a segment whose placement was [`Placement::Fits`], then moves
    /// any newly contiguous run into the ready queue.
    pub fn insert(&mut self, seg: Segment) {
        debug_assert_eq!(self.placement(seg.sn), Placement::Fits);
        self.buf.insert(seg.sn, seg);
        self.migrate();
        self.check_rep();
    }

    /// Moves the longest contiguous prefix starting at `nxt` into the ready
    /// queue, advancing `nxt` one segment at a time.
    pub fn migrate(&mut self) {
        loop {
            let Some(&sn) = self.buf.keys().next() else {
                break;
            };
            if sn != self.nxt || self.queue.len() >= self.wnd as usize {
                break;
            }
            let seg = self.buf.remove(&sn).unwrap();
            self.queue.push_back(seg);
            self.nxt.increment();
        }
        self.check_rep();
    }

    /// Size of the whole message at the head of the ready queue.
    ///
    /// The head message is complete once segments counting `frg` down to 0
    /// are all queued; until then the message must not be delivered.
    #[must_use]
    pub fn peek_size(&self) -> Result<usize, PeekError> {
        let first = self.queue.front().ok_or(PeekError::NoData)?;
        if first.frg == 0 {
            return Ok(first.payload.len());
        }
        if self.queue.len() < first.frg as usize + 1 {
            return Err(PeekError::FragmentIncomplete);
        }
        let mut size = 0;
        for seg in &self.queue {
            size += seg.payload.len();
            if seg.frg == 0 {
                break;
            }
        }
        Ok(size)
    }

    /// Copies the head message into `buf` and retires its segments.
    ///
    /// The caller must have sized `buf` via [`RcvBuf::peek_size`].
    pub fn pop_msg(&mut self, buf: &mut [u8], pool: &mut SegmentPool) -> usize {
        let mut copied = 0;
        while let Some(seg) = self.queue.pop_front() {
            buf[copied..copied + seg.payload.len()].copy_from_slice(&seg.payload);
            copied += seg.payload.len();
            let last = seg.frg == 0;
            pool.put(seg);
            if last {
                break;
            }
        }
        self.check_rep();
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_seg(sn: u32, frg: u8, payload: &[u8]) -> Segment {
        let mut seg = Segment::new();
        seg.sn = Seq32::from_u32(sn);
        seg.frg = frg;
        seg.payload.extend_from_slice(payload);
        seg
    }

    #[test]
    fn reorders_and_reassembles() {
        let mut rcv = RcvBuf::new(128);
        let mut pool = SegmentPool::new(8);
        for (sn, frg, body) in [(2, 0, b"CCC"), (1, 1, b"BBB"), (0, 2, b"AAA")] {
            let seg = push_seg(sn, frg, body);
            assert_eq!(rcv.placement(seg.sn), Placement::Fits);
            rcv.insert(seg);
        }
        assert_eq!(rcv.nxt().to_u32(), 3);
        assert_eq!(rcv.peek_size(), Ok(9));
        let mut out = [0u8; 16];
        let n = rcv.pop_msg(&mut out, &mut pool);
        assert_eq!(&out[..n], b"AAABBBCCC");
        assert_eq!(rcv.peek_size(), Err(PeekError::NoData));
    }

    #[test]
    fn incomplete_message_is_gated() {
        let mut rcv = RcvBuf::new(128);
        rcv.insert(push_seg(0, 2, b"AAA"));
        rcv.insert(push_seg(1, 1, b"BBB"));
        // frg did not reach 0 yet
        assert_eq!(rcv.peek_size(), Err(PeekError::FragmentIncomplete));
        rcv.insert(push_seg(2, 0, b"CCC"));
        assert_eq!(rcv.peek_size(), Ok(9));
    }

    #[test]
    fn placements() {
        let mut rcv = RcvBuf::new(4);
        rcv.insert(push_seg(0, 0, b"x"));
        rcv.insert(push_seg(2, 0, b"y"));
        assert_eq!(rcv.placement(Seq32::from_u32(0)), Placement::TooLate);
        assert_eq!(rcv.placement(Seq32::from_u32(2)), Placement::Duplicate);
        assert_eq!(rcv.placement(Seq32::from_u32(5)), Placement::TooEarly);
        assert_eq!(rcv.placement(Seq32::from_u32(3)), Placement::Fits);
    }

    #[test]
    fn admission_bound() {
        let mut rcv = RcvBuf::new(2);
        rcv.insert(push_seg(0, 0, b"a"));
        rcv.insert(push_seg(1, 0, b"b"));
        // queue holds wnd segments; nothing else fits even though sn 2 is
        // inside the sequence window
        assert_eq!(rcv.placement(Seq32::from_u32(2)), Placement::NoRoom);
        assert_eq!(rcv.unused(), 0);

        let mut pool = SegmentPool::new(4);
        let mut out = [0u8; 4];
        rcv.pop_msg(&mut out, &mut pool);
        assert_eq!(rcv.placement(Seq32::from_u32(2)), Placement::Fits);
        assert_eq!(rcv.unused(), 1);
    }

    #[test]
    fn migration_stops_at_gap() {
        let mut rcv = RcvBuf::new(128);
        rcv.insert(push_seg(0, 0, b"a"));
        rcv.insert(push_seg(2, 0, b"c"));
        assert_eq!(rcv.nxt().to_u32(), 1);
        assert_eq!(rcv.queue_len(), 1);
        rcv.insert(push_seg(1, 0, b"b"));
        assert_eq!(rcv.nxt().to_u32(), 3);
        assert_eq!(rcv.queue_len(), 3);
    }

    #[test]
    fn wraparound_window() {
        let mut rcv = RcvBuf::with_start(Seq32::from_u32(u32::MAX), 128);
        let mut pool = SegmentPool::new(8);
        rcv.insert(push_seg(0, 0, b"second"));
        assert_eq!(rcv.queue_len(), 0);
        rcv.insert(push_seg(u32::MAX, 1, b"first-"));
        assert_eq!(rcv.nxt().to_u32(), 1);
        assert_eq!(rcv.peek_size(), Ok(12));
        let mut out = [0u8; 12];
        let n = rcv.pop_msg(&mut out, &mut pool);
        assert_eq!(&out[..n], b"first-second");
    }

    #[test]
    fn unused_tracks_ready_queue() {
        let mut rcv = RcvBuf::new(4);
        assert_eq!(rcv.unused(), 4);
        rcv.insert(push_seg(0, 0, b"a"));
        assert_eq!(rcv.unused(), 3);
        // out-of-order segments do not consume advertised slots
        rcv.insert(push_seg(2, 0, b"c"));
        assert_eq!(rcv.unused(), 3);
    }
}
