use crate::protocol::segment_hdr::{Command, SegmentHeader, SEG_HDR_LEN};
use crate::utils::{ts_diff, Seq32};

use super::{Link, OutputFn, ASK_SEND, ASK_TELL};

// zero-window probe backoff, milliseconds
const PROBE_INIT: u32 = 7_000;
const PROBE_LIMIT: u32 = 120_000;

// a clock jump this large resets the flush schedule
const CLOCK_JUMP: i32 = 10_000;

/// Hands the scratch buffer to the sink and clears it.
fn emit(buffer: &mut Vec<u8>, output: &mut Option<OutputFn>) {
    if buffer.is_empty() {
        return;
    }
    if let Some(output) = output.as_mut() {
        output(&buffer[..]);
    }
    buffer.clear();
}

impl Link {
    /// Latches the clock and flushes when the cadence is due.
    ///
    /// `current` is milliseconds from an arbitrary epoch; it must come from
    /// the same clock on every call. A jump beyond ±10 s in either
    /// direction resets the schedule instead of flushing in a burst.
    pub fn update(&mut self, current: u32) {
        self.current = current;
        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }
        let mut slap = ts_diff(current, self.ts_flush);
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&slap) {
            self.ts_flush = current;
            slap = 0;
        }
        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if ts_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Earliest time the caller must call [`Link::update`] again: the next
    /// scheduled flush or the earliest retransmission deadline, whichever
    /// comes first, never further than one interval away. Returns `current`
    /// when a flush is already due (or the instance was never updated).
    #[must_use]
    pub fn check(&self, current: u32) -> u32 {
        if !self.updated {
            return current;
        }
        let mut ts_flush = self.ts_flush;
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&ts_diff(current, ts_flush)) {
            ts_flush = current;
        }
        if ts_diff(current, ts_flush) >= 0 {
            return current;
        }
        let mut minimal = ts_diff(ts_flush, current);
        match self.snd_buf.min_resend_delta(current) {
            Some(delta) if delta <= 0 => return current,
            Some(delta) => minimal = i32::min(minimal, delta),
            None => {}
        }
        let minimal = u32::min(minimal as u32, self.interval);
        current.wrapping_add(minimal)
    }

    /// Drains pending acks, probes and window-eligible data into MTU-sized
    /// datagrams and hands them to the output sink.
    ///
    /// Does nothing until the first `update` has latched a clock.
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }
        let current = self.current;
        let wnd = self.rcv_buf.unused();
        let una = self.rcv_buf.nxt();
        let mut lost = false;
        let mut change = 0u32;

        let control = SegmentHeader {
            conv: self.conv,
            cmd: Command::Ack.into(),
            frg: 0,
            wnd,
            ts: 0,
            sn: Seq32::from_u32(0),
            una,
            len: 0,
        };

        // acknowledgements first, so they ride ahead of data
        for i in 0..self.acklist.len() {
            if self.buffer.len() + SEG_HDR_LEN > self.mtu {
                emit(&mut self.buffer, &mut self.output);
            }
            let (sn, ts) = self.acklist[i];
            SegmentHeader { sn, ts, ..control }.append_to(&mut self.buffer);
            self.stat.acks_sent += 1;
        }
        self.acklist.clear();

        // when the peer advertises a closed window, probe it with an
        // exponential backoff instead of stalling forever
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if ts_diff(current, self.ts_probe) >= 0 {
                if self.probe_wait < PROBE_INIT {
                    self.probe_wait = PROBE_INIT;
                }
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = u32::min(self.probe_wait, PROBE_LIMIT);
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe |= ASK_SEND;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        if self.probe & ASK_SEND != 0 {
            if self.buffer.len() + SEG_HDR_LEN > self.mtu {
                emit(&mut self.buffer, &mut self.output);
            }
            SegmentHeader {
                cmd: Command::AskWnd.into(),
                ..control
            }
            .append_to(&mut self.buffer);
            self.stat.probes_sent += 1;
        }
        if self.probe & ASK_TELL != 0 {
            if self.buffer.len() + SEG_HDR_LEN > self.mtu {
                emit(&mut self.buffer, &mut self.output);
            }
            SegmentHeader {
                cmd: Command::TellWnd.into(),
                ..control
            }
            .append_to(&mut self.buffer);
            self.stat.probes_sent += 1;
        }
        self.probe = 0;

        // effective send window
        let mut cwnd = u32::min(self.snd_wnd as u32, self.rmt_wnd as u32);
        if !self.nocwnd {
            cwnd = u32::min(cwnd, self.cc.cwnd());
        }

        // promote queued fragments into the in-flight window
        while self.snd_buf.inflight() < cwnd {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.cmd = Command::Push;
            seg.wnd = wnd;
            seg.ts = current;
            seg.una = una;
            seg.resendts = current;
            seg.rto = self.rtt.rto();
            seg.fastack = 0;
            seg.xmit = 0;
            self.snd_buf.push(seg);
        }

        // transmission policy
        let resent = if self.fastresend > 0 {
            Some(self.fastresend)
        } else {
            None
        };
        let rx_rto = self.rtt.rto();
        let rtomin = if self.nodelay == 0 { rx_rto >> 3 } else { 0 };
        let conv = self.conv;
        let mtu = self.mtu;
        let nodelay = self.nodelay;
        let fastlimit = self.fastlimit;
        let dead_link = self.dead_link;

        for seg in self.snd_buf.iter_mut() {
            let mut needsend = false;
            if seg.xmit == 0 {
                // first transmission
                needsend = true;
                seg.xmit = 1;
                seg.rto = rx_rto;
                seg.resendts = current.wrapping_add(seg.rto + rtomin);
            } else if ts_diff(current, seg.resendts) >= 0 {
                // retransmission timeout; backoff depends on the profile
                needsend = true;
                seg.xmit += 1;
                if nodelay == 0 {
                    seg.rto += u32::max(seg.rto, rx_rto);
                } else {
                    let step = if nodelay < 2 { seg.rto } else { rx_rto };
                    seg.rto += step / 2;
                }
                seg.resendts = current.wrapping_add(seg.rto);
                lost = true;
                self.stat.rto_hits += 1;
                self.stat.retransmissions += 1;
            } else if resent.is_some_and(|threshold| seg.fastack >= threshold) {
                // enough newer segments were acked past this one
                if seg.xmit <= fastlimit || fastlimit == 0 {
                    needsend = true;
                    seg.xmit += 1;
                    seg.fastack = 0;
                    seg.resendts = current.wrapping_add(seg.rto);
                    change += 1;
                    self.stat.fast_retransmissions += 1;
                    self.stat.retransmissions += 1;
                }
            }

            if needsend {
                seg.ts = current;
                seg.wnd = wnd;
                seg.una = una;
                let need = SEG_HDR_LEN + seg.payload.len();
                if self.buffer.len() + need > mtu {
                    emit(&mut self.buffer, &mut self.output);
                }
                seg.header(conv).append_to(&mut self.buffer);
                self.buffer.extend_from_slice(&seg.payload);
                self.stat.pushes += 1;
                if seg.xmit >= dead_link {
                    self.dead = true;
                    self.stat.dead_link_events += 1;
                }
            }
        }

        emit(&mut self.buffer, &mut self.output);

        // post-flush congestion verdicts
        if let Some(resent) = resent {
            if change > 0 {
                let inflight = self.snd_buf.inflight();
                self.cc.on_fast_resend(inflight, resent, self.mss as u32);
            }
        }
        if lost {
            self.cc.on_loss(cwnd, self.mss as u32);
        }
        self.cc.clamp_floor(self.mss as u32);
    }
}
