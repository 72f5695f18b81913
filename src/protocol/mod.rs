//! # Segment header
//!
//! Every segment on the wire starts with a fixed 24-byte little-endian
//! header, immediately followed by `len` bytes of payload:
//!
//! ```text
//! 0               4   5   6       8 (BYTE)
//! +---------------+---+---+-------+
//! |      conv     |cmd|frg|  wnd  |
//! +---------------+---+---+-------+
//! |      ts       |      sn       |
//! +---------------+---------------+
//! |      una      |      len      |
//! +---------------+---------------+
//! |                               |
//! |         DATA (optional)       |
//! |                               |
//! +-------------------------------+
//! ```
//!
//! # Datagram structure
//!
//! ```text
//! (Segment header) (Body)?
//! (Segment header) (Body)?
//! ...
//! ```
//!
//! Segments are packed back to back; a datagram never exceeds the
//! configured MTU.
//!
//! # Invariants
//!
//! - `len` is `0` for `Ack`, `AskWnd` and `TellWnd` segments
//! - `conv` is identical for every segment of a conversation

pub mod segment_hdr;
