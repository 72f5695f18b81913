use std::io::Cursor;

use crate::protocol::segment_hdr::{Command, SegmentHeader, SEG_HDR_LEN};
use crate::utils::{ts_diff, Seq32};

use super::rcv_buf::Placement;
use super::{InputError, Link, ASK_TELL};

impl Link {
    /// Feeds one received datagram: zero or more back-to-back segments.
    ///
    /// Segments decoded before a malformed one keep their effects; the
    /// error reports the first fault. Out-of-window data is dropped
    /// silently, but any push inside the receive window is acknowledged
    /// even when its payload is a duplicate being re-dropped.
    pub fn input(&mut self, data: &[u8]) -> Result<(), InputError> {
        if data.len() < SEG_HDR_LEN {
            return Err(InputError::TooShort);
        }
        self.stat.packets_in += 1;

        let prev_una = self.snd_buf.una();
        // highest selective ack in this datagram, with its send timestamp
        let mut max_ack: Option<(Seq32, u32)> = None;

        let mut rdr = Cursor::new(data);
        loop {
            let offset = rdr.position() as usize;
            if data.len() - offset < SEG_HDR_LEN {
                break;
            }
            let hdr = SegmentHeader::from_bytes(&mut rdr).expect("length checked");
            if hdr.conv != self.conv {
                return Err(InputError::ConvMismatch);
            }
            let body_offset = rdr.position() as usize;
            let len = hdr.len as usize;
            if data.len() - body_offset < len || len > self.mtu {
                return Err(InputError::Truncated);
            }
            let cmd = Command::try_from(hdr.cmd).map_err(|_e| InputError::UnknownCommand)?;

            self.rmt_wnd = hdr.wnd;
            self.snd_buf.ack_before(hdr.una, &mut self.pool);
            self.snd_buf.shrink();

            match cmd {
                Command::Ack => {
                    let rtt = ts_diff(self.current, hdr.ts);
                    if rtt >= 0 {
                        self.rtt.sample(rtt as u32, self.interval);
                    }
                    if let Some(seg) = self.snd_buf.ack(hdr.sn) {
                        self.pool.put(seg);
                    }
                    self.snd_buf.shrink();
                    self.stat.acks_in += 1;
                    max_ack = match max_ack {
                        None => Some((hdr.sn, hdr.ts)),
                        Some((sn, ts)) => {
                            // advance only when both the sequence number and
                            // the timestamp are newer, so reordered acks do
                            // not inflate the skip counters
                            if hdr.sn.diff(sn) > 0 && ts_diff(hdr.ts, ts) > 0 {
                                Some((hdr.sn, hdr.ts))
                            } else {
                                Some((sn, ts))
                            }
                        }
                    };
                }
                Command::Push => {
                    match self.rcv_buf.placement(hdr.sn) {
                        Placement::Fits => {
                            self.acklist.push((hdr.sn, hdr.ts));
                            let mut seg = self.pool.take();
                            seg.cmd = Command::Push;
                            seg.frg = hdr.frg;
                            seg.wnd = hdr.wnd;
                            seg.ts = hdr.ts;
                            seg.sn = hdr.sn;
                            seg.una = hdr.una;
                            seg.payload
                                .extend_from_slice(&data[body_offset..body_offset + len]);
                            self.rcv_buf.insert(seg);
                        }
                        Placement::Duplicate => {
                            self.acklist.push((hdr.sn, hdr.ts));
                            self.stat.duplicates += 1;
                        }
                        Placement::TooLate => {
                            self.acklist.push((hdr.sn, hdr.ts));
                            self.stat.late_drops += 1;
                        }
                        // unadmitted data must not be acked, the peer will
                        // retransmit it once the window reopens
                        Placement::TooEarly | Placement::NoRoom => {
                            self.stat.early_drops += 1;
                        }
                    }
                }
                Command::AskWnd => {
                    self.probe |= ASK_TELL;
                }
                Command::TellWnd => {
                    // window already taken from the header
                }
            }
            rdr.set_position((body_offset + len) as u64);
        }

        if let Some((sn, ts)) = max_ack {
            self.snd_buf.mark_skips(sn, ts);
        }
        if self.snd_buf.una().diff(prev_una) > 0 {
            self.cc.on_progress(self.rmt_wnd as u32, self.mss as u32);
        }
        Ok(())
    }
}
