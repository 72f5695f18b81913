//! The reliable link instance.
//!
//! One [`Link`] holds the whole protocol state for one peer: the four
//! segment queues, the ack ledger, the retransmission timers and the
//! congestion window. It performs no I/O and keeps no clock; the embedder
//! feeds it datagrams ([`Link::input`]), milliseconds ([`Link::update`])
//! and a sink for outgoing datagrams ([`Link::set_output`]).
//!
//! Every entry point runs to completion; the instance is single-owner and
//! must not be re-entered from the output sink.

use std::collections::VecDeque;

use crate::protocol::segment_hdr::SEG_HDR_LEN;
use crate::utils::Seq32;

mod congestion;
mod flush;
mod input;
mod rcv_buf;
mod rtt;
mod segment;
mod snd_buf;

pub use rcv_buf::PeekError;

use congestion::CongestionCtrl;
use rcv_buf::RcvBuf;
use rtt::RttEstimator;
use segment::{Segment, SegmentPool};
use snd_buf::SndBuf;

pub(crate) const MTU_DEF: usize = 1400;
pub(crate) const MTU_MIN: usize = 50;
pub(crate) const WND_SND_DEF: u16 = 32;
pub(crate) const WND_RCV_DEF: u16 = 128;
pub(crate) const INTERVAL_DEF: u32 = 100;
pub(crate) const INTERVAL_MIN: u32 = 10;
pub(crate) const INTERVAL_MAX: u32 = 5000;
pub(crate) const FASTLIMIT_DEF: u32 = 5;
pub(crate) const DEAD_LINK_DEF: u32 = 20;
const POOL_CAP: usize = 64;

// probe flags
pub(crate) const ASK_SEND: u32 = 1;
pub(crate) const ASK_TELL: u32 = 2;

/// Sink for outgoing datagrams, invoked synchronously from `flush`.
///
/// The slice is borrowed for the duration of the call; copy or transmit it
/// before returning. The sink must not call back into the same instance.
pub type OutputFn = Box<dyn FnMut(&[u8])>;

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    EmptyData,
    /// The message would fragment into at least `rcv_wnd` segments.
    FragmentTooLarge,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RecvError {
    NoData,
    /// The head message is still missing fragments.
    FragmentIncomplete,
    /// The caller's buffer is smaller than the head message.
    BufferTooSmall,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InputError {
    /// Datagram shorter than one segment header.
    TooShort,
    /// A segment carried a foreign conversation id.
    ConvMismatch,
    /// A segment advertised more payload than the datagram holds, or more
    /// than one MTU.
    Truncated,
    /// Unrecognized command byte.
    UnknownCommand,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    InvalidMtu,
}

struct LocalStat {
    pushes: u64,
    acks_sent: u64,
    retransmissions: u64,
    rto_hits: u64,
    fast_retransmissions: u64,
    probes_sent: u64,
    packets_in: u64,
    acks_in: u64,
    duplicates: u64,
    early_drops: u64,
    late_drops: u64,
    dead_link_events: u64,
}

/// Point-in-time snapshot of counters and live protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub pushes: u64,
    pub acks_sent: u64,
    pub retransmissions: u64,
    pub rto_hits: u64,
    pub fast_retransmissions: u64,
    pub probes_sent: u64,
    pub packets_in: u64,
    pub acks_in: u64,
    pub duplicates: u64,
    pub early_drops: u64,
    pub late_drops: u64,
    pub dead_link_events: u64,
    pub srtt: u32,
    pub rto: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub rcv_nxt: u32,
}

/// Reliable, ordered byte-message transport over an unreliable datagram
/// substrate. One instance per peer.
///
/// Dropping the instance releases every queue and buffer.
pub struct Link {
    conv: u32,
    dead: bool,

    mtu: usize,
    mss: usize,

    // send side
    snd_wnd: u16,
    rmt_wnd: u16,
    snd_queue: VecDeque<Segment>,
    snd_buf: SndBuf,

    // receive side
    rcv_buf: RcvBuf,
    acklist: Vec<(Seq32, u32)>,

    // timing
    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,

    // zero-window probing
    probe: u32,
    ts_probe: u32,
    probe_wait: u32,

    // tuning
    nodelay: u32,
    fastresend: u32,
    fastlimit: u32,
    nocwnd: bool,
    stream: bool,
    dead_link: u32,

    rtt: RttEstimator,
    cc: CongestionCtrl,

    // shared datagram scratch, reused across flushes
    buffer: Vec<u8>,
    output: Option<OutputFn>,

    pool: SegmentPool,
    stat: LocalStat,
}

/// Configuration for a new [`Link`]; fields mirror the tuning knobs.
pub struct LinkBuilder {
    pub conv: u32,
    pub mtu: usize,
    pub snd_wnd: u16,
    pub rcv_wnd: u16,
    pub interval: u32,
    pub nodelay: u32,
    pub fastresend: u32,
    pub fastlimit: u32,
    pub nocwnd: bool,
    pub stream: bool,
    pub dead_link: u32,
}

impl LinkBuilder {
    #[must_use]
    pub fn new(conv: u32) -> Self {
        LinkBuilder {
            conv,
            mtu: MTU_DEF,
            snd_wnd: WND_SND_DEF,
            rcv_wnd: WND_RCV_DEF,
            interval: INTERVAL_DEF,
            nodelay: 0,
            fastresend: 0,
            fastlimit: FASTLIMIT_DEF,
            nocwnd: false,
            stream: false,
            dead_link: DEAD_LINK_DEF,
        }
    }

    pub fn build(self) -> Result<Link, ConfigError> {
        let mut link = Link::new(self.conv);
        link.set_mtu(self.mtu)?;
        link.set_wndsize(self.snd_wnd, self.rcv_wnd);
        link.set_nodelay(
            Some(self.nodelay),
            Some(self.interval),
            Some(self.fastresend),
            Some(self.nocwnd),
        );
        link.fastlimit = self.fastlimit;
        link.stream = self.stream;
        link.dead_link = self.dead_link;
        link.check_rep();
        Ok(link)
    }
}

impl Link {
    #[inline]
    fn check_rep(&self) {
        assert_eq!(self.mss, self.mtu - SEG_HDR_LEN);
        assert!(self.mtu >= MTU_MIN);
    }

    /// Creates an instance with default tuning.
    #[must_use]
    pub fn new(conv: u32) -> Self {
        let this = Link {
            conv,
            dead: false,
            mtu: MTU_DEF,
            mss: MTU_DEF - SEG_HDR_LEN,
            snd_wnd: WND_SND_DEF,
            rmt_wnd: WND_RCV_DEF,
            snd_queue: VecDeque::new(),
            snd_buf: SndBuf::new(),
            rcv_buf: RcvBuf::new(WND_RCV_DEF),
            acklist: Vec::new(),
            current: 0,
            interval: INTERVAL_DEF,
            ts_flush: INTERVAL_DEF,
            updated: false,
            probe: 0,
            ts_probe: 0,
            probe_wait: 0,
            nodelay: 0,
            fastresend: 0,
            fastlimit: FASTLIMIT_DEF,
            nocwnd: false,
            stream: false,
            dead_link: DEAD_LINK_DEF,
            rtt: RttEstimator::new(),
            cc: CongestionCtrl::new(),
            buffer: Vec::with_capacity((MTU_DEF + SEG_HDR_LEN) * 3),
            output: None,
            pool: SegmentPool::new(POOL_CAP),
            stat: LocalStat {
                pushes: 0,
                acks_sent: 0,
                retransmissions: 0,
                rto_hits: 0,
                fast_retransmissions: 0,
                probes_sent: 0,
                packets_in: 0,
                acks_in: 0,
                duplicates: 0,
                early_drops: 0,
                late_drops: 0,
                dead_link_events: 0,
            },
        };
        this.check_rep();
        this
    }

    /// Installs the datagram sink used by `flush`.
    pub fn set_output(&mut self, output: OutputFn) {
        self.output = Some(output);
    }

    /// Queues application bytes for transmission, fragmenting above `mss`.
    ///
    /// In stream mode the bytes first top up the tail segment of the send
    /// queue and every fragment carries `frg = 0`; otherwise the fragments
    /// count `frg` down to 0 so the receiver can reassemble the message.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if data.is_empty() {
            return Err(SendError::EmptyData);
        }
        let total = data.len();
        let mut data = data;

        // coalesce with the pending tail up to one mss
        if self.stream {
            if let Some(tail) = self.snd_queue.back_mut() {
                if tail.payload.len() < self.mss {
                    let room = self.mss - tail.payload.len();
                    let take = usize::min(room, data.len());
                    tail.payload.extend_from_slice(&data[..take]);
                    tail.frg = 0;
                    data = &data[take..];
                }
            }
            if data.is_empty() {
                return Ok(total);
            }
        }

        let count = data.len().div_ceil(self.mss);
        if count >= self.rcv_buf.wnd() as usize {
            return Err(SendError::FragmentTooLarge);
        }

        for (i, chunk) in data.chunks(self.mss).enumerate() {
            let mut seg = self.pool.take();
            seg.payload.extend_from_slice(chunk);
            seg.frg = if self.stream {
                0
            } else {
                (count - 1 - i) as u8
            };
            self.snd_queue.push_back(seg);
        }
        Ok(total)
    }

    /// Copies the next complete message into `buf` and retires it.
    ///
    /// When delivery reopens a receive window that had been full, a window
    /// advertisement is scheduled so the peer can resume sending.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        let size = match self.rcv_buf.peek_size() {
            Ok(size) => size,
            Err(PeekError::NoData) => return Err(RecvError::NoData),
            Err(PeekError::FragmentIncomplete) => return Err(RecvError::FragmentIncomplete),
        };
        if size > buf.len() {
            return Err(RecvError::BufferTooSmall);
        }

        let was_full = self.rcv_buf.queue_len() >= self.rcv_buf.wnd() as usize;
        let copied = self.rcv_buf.pop_msg(buf, &mut self.pool);
        self.rcv_buf.migrate();
        if was_full && self.rcv_buf.queue_len() < self.rcv_buf.wnd() as usize {
            self.probe |= ASK_TELL;
        }
        debug_assert_eq!(copied, size);
        Ok(copied)
    }

    /// Size of the next complete message, for buffer sizing before `recv`.
    pub fn peek_size(&self) -> Result<usize, PeekError> {
        self.rcv_buf.peek_size()
    }

    /// Segments waiting to be sent or still unacknowledged.
    #[must_use]
    pub fn waitsnd(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    /// Free receive slots, as advertised to the peer.
    #[must_use]
    pub fn wnd_unused(&self) -> u16 {
        self.rcv_buf.unused()
    }

    #[must_use]
    #[inline]
    pub fn conv(&self) -> u32 {
        self.conv
    }

    #[must_use]
    #[inline]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    #[must_use]
    #[inline]
    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Current retransmission timeout in milliseconds.
    #[must_use]
    #[inline]
    pub fn rto(&self) -> u32 {
        self.rtt.rto()
    }

    /// Smoothed round-trip time; 0 until the first sample.
    #[must_use]
    #[inline]
    pub fn srtt(&self) -> u32 {
        self.rtt.srtt()
    }

    /// True once any segment has been retransmitted `dead_link` times; the
    /// embedder should tear the instance down.
    #[must_use]
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Changes the maximum datagram size. Configure before sending: segments
    /// already queued are not repacked and may exceed a reduced MTU.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), ConfigError> {
        if mtu < MTU_MIN || mtu < SEG_HDR_LEN {
            return Err(ConfigError::InvalidMtu);
        }
        self.mtu = mtu;
        self.mss = mtu - SEG_HDR_LEN;
        self.buffer = Vec::with_capacity((mtu + SEG_HDR_LEN) * 3);
        self.check_rep();
        Ok(())
    }

    /// Sets the send and receive windows in segments; zero leaves a field
    /// unchanged. The receive window never goes below 128.
    pub fn set_wndsize(&mut self, snd_wnd: u16, rcv_wnd: u16) {
        if snd_wnd > 0 {
            self.snd_wnd = snd_wnd;
        }
        if rcv_wnd > 0 {
            self.rcv_buf.set_wnd(u16::max(rcv_wnd, WND_RCV_DEF));
        }
    }

    /// Latency tuning. `None` leaves a field unchanged.
    ///
    /// `nodelay` 0 keeps the conservative 100 ms minimum RTO and doubling
    /// backoff; 1 and 2 switch to a 30 ms minimum with gentler backoff
    /// schedules. `interval` is clamped to 10..=5000 ms. `resend` is the
    /// skip threshold for fast retransmission (0 disables it). `nc` true
    /// stops the congestion window from capping the send window.
    pub fn set_nodelay(
        &mut self,
        nodelay: Option<u32>,
        interval: Option<u32>,
        resend: Option<u32>,
        nc: Option<bool>,
    ) {
        if let Some(nodelay) = nodelay {
            self.nodelay = nodelay;
            self.rtt.set_minrto(if nodelay > 0 {
                rtt::RTO_MIN_NODELAY
            } else {
                rtt::RTO_MIN
            });
        }
        if let Some(interval) = interval {
            self.interval = interval.clamp(INTERVAL_MIN, INTERVAL_MAX);
        }
        if let Some(resend) = resend {
            self.fastresend = resend;
        }
        if let Some(nc) = nc {
            self.nocwnd = nc;
        }
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            pushes: self.stat.pushes,
            acks_sent: self.stat.acks_sent,
            retransmissions: self.stat.retransmissions,
            rto_hits: self.stat.rto_hits,
            fast_retransmissions: self.stat.fast_retransmissions,
            probes_sent: self.stat.probes_sent,
            packets_in: self.stat.packets_in,
            acks_in: self.stat.acks_in,
            duplicates: self.stat.duplicates,
            early_drops: self.stat.early_drops,
            late_drops: self.stat.late_drops,
            dead_link_events: self.stat.dead_link_events,
            srtt: self.rtt.srtt(),
            rto: self.rtt.rto(),
            cwnd: self.cc.cwnd(),
            ssthresh: self.cc.ssthresh(),
            snd_una: self.snd_buf.una().to_u32(),
            snd_nxt: self.snd_buf.nxt().to_u32(),
            rcv_nxt: self.rcv_buf.nxt().to_u32(),
        }
    }
}
