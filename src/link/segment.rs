use bytes::BytesMut;

use crate::protocol::segment_hdr::{Command, SegmentHeader};
use crate::utils::Seq32;

/// The unit of transmission.
///
/// Wire fields plus the per-segment retransmission state that never leaves
/// the instance. A segment is owned by exactly one queue at a time; it moves
/// between queues whole.
#[derive(Debug)]
pub(crate) struct Segment {
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: Seq32,
    pub una: Seq32,
    pub payload: BytesMut,

    // retransmission state, not on the wire
    pub resendts: u32,
    pub rto: u32,
    pub fastack: u32,
    pub xmit: u32,
}

impl Segment {
    #[must_use]
    pub fn new() -> Self {
        Segment {
            cmd: Command::Push,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: Seq32::from_u32(0),
            una: Seq32::from_u32(0),
            payload: BytesMut::new(),
            resendts: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Clears payload and metadata so the record can be reused.
    pub fn reset(&mut self) {
        self.cmd = Command::Push;
        self.frg = 0;
        self.wnd = 0;
        self.ts = 0;
        self.sn = Seq32::from_u32(0);
        self.una = Seq32::from_u32(0);
        self.payload.clear();
        self.resendts = 0;
        self.rto = 0;
        self.fastack = 0;
        self.xmit = 0;
    }

    #[must_use]
    pub fn header(&self, conv: u32) -> SegmentHeader {
        SegmentHeader {
            conv,
            cmd: self.cmd.into(),
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn,
            una: self.una,
            len: self.payload.len() as u32,
        }
    }
}

/// Free list of segment records.
///
/// Recycles records (and their payload capacity) instead of allocating one
/// per inbound or outbound fragment. Records come back cleared.
pub(crate) struct SegmentPool {
    free: Vec<Segment>,
    cap: usize,
}

impl SegmentPool {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        SegmentPool {
            free: Vec::new(),
            cap,
        }
    }

    #[must_use]
    pub fn take(&mut self) -> Segment {
        self.free.pop().unwrap_or_else(Segment::new)
    }

    pub fn put(&mut self, mut seg: Segment) {
        if self.free.len() < self.cap {
            seg.reset();
            self.free.push(seg);
        }
    }
}
