use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::utils::Seq32;

pub const SEG_HDR_LEN: usize = 24;

/// Command byte of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Data segment.
    Push = 81,
    /// Selective acknowledgement of one `sn`.
    Ack = 82,
    /// Window probe: asks the peer to advertise its receive window.
    AskWnd = 83,
    /// Window advertisement, answering `AskWnd`.
    TellWnd = 84,
}

/// The fixed leading part of every segment.
///
/// `cmd` stays a raw byte here; the input path validates it against
/// [`Command`] only after the length checks, so a truncated segment with a
/// garbage command byte is still reported as truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: Seq32,
    pub una: Seq32,
    pub len: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { field: &'static str },
}

impl SegmentHeader {
    pub fn from_bytes(rdr: &mut io::Cursor<&[u8]>) -> Result<Self, DecodeError> {
        let conv = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "conv" })?;
        let cmd = rdr
            .read_u8()
            .map_err(|_e| DecodeError::Truncated { field: "cmd" })?;
        let frg = rdr
            .read_u8()
            .map_err(|_e| DecodeError::Truncated { field: "frg" })?;
        let wnd = rdr
            .read_u16::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "wnd" })?;
        let ts = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "ts" })?;
        let sn = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "sn" })?;
        let una = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "una" })?;
        let len = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_e| DecodeError::Truncated { field: "len" })?;

        Ok(SegmentHeader {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn: Seq32::from_u32(sn),
            una: Seq32::from_u32(una),
            len,
        })
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) {
        let before = buf.len();
        buf.write_u32::<LittleEndian>(self.conv).unwrap();
        buf.write_u8(self.cmd).unwrap();
        buf.write_u8(self.frg).unwrap();
        buf.write_u16::<LittleEndian>(self.wnd).unwrap();
        buf.write_u32::<LittleEndian>(self.ts).unwrap();
        buf.write_u32::<LittleEndian>(self.sn.to_u32()).unwrap();
        buf.write_u32::<LittleEndian>(self.una.to_u32()).unwrap();
        buf.write_u32::<LittleEndian>(self.len).unwrap();
        assert_eq!(buf.len() - before, SEG_HDR_LEN);
    }
}

/// Extracts `conv` from the first four bytes of a datagram, letting an
/// embedder dispatch it to the instance it belongs to.
pub fn peek_conv(buf: &[u8]) -> Result<u32, DecodeError> {
    let mut rdr = io::Cursor::new(buf);
    rdr.read_u32::<LittleEndian>()
        .map_err(|_e| DecodeError::Truncated { field: "conv" })
}
