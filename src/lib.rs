//! Latency-first reliable ARQ link over unreliable datagrams.
//!
//! `fastlink` turns a lossy datagram substrate (typically UDP) into a
//! reliable, ordered byte-message transport tuned for low latency: selective
//! acknowledgement and retransmission, windowed flow control, TCP-style
//! congestion control with an aggressive minimum RTO, optional fast resend
//! and zero-window probing. It trades some bandwidth for a flatter latency
//! tail.
//!
//! The crate is sans-IO: a [`Link`] owns the protocol state for exactly one
//! peer and never touches sockets, clocks or threads. The embedder feeds it
//! received datagrams with [`Link::input`], drives it with
//! [`Link::update`] / [`Link::check`], and collects outgoing datagrams
//! through the sink installed with [`Link::set_output`]. Multiplexing many
//! peers over one socket is the embedder's job; [`peek_conv`] reads the
//! conversation id off a raw datagram for dispatch.
//!
//! ```
//! use fastlink::Link;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let wire: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
//! let tx = Rc::clone(&wire);
//!
//! let mut link = Link::new(0x1122_3344);
//! link.set_nodelay(Some(1), Some(10), Some(2), Some(true));
//! link.set_output(Box::new(move |datagram| {
//!     tx.borrow_mut().push(datagram.to_vec());
//! }));
//!
//! link.send(b"hello").unwrap();
//! link.update(0);
//! assert!(!wire.borrow().is_empty());
//! ```

pub mod link;
pub mod protocol;
pub mod utils;

pub use link::{
    ConfigError, InputError, Link, LinkBuilder, OutputFn, PeekError, RecvError, SendError, Stat,
};
pub use protocol::segment_hdr::peek_conv;
