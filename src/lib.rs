//! LRCP is a session protocol that provides reliable, ordered byte streams on top of UDP. It was
//!  designed for a line reversal service (hence the name: *line reversal control protocol*), but
//!  the transport does not care what the streams contain.
//!
//! ## Overview
//!
//! * A peer (i.e. a remote UDP address) can open any number of *sessions*, each identified by a
//!   numeric id chosen by the peer. Sessions of different peers are independent, even if they
//!   share an id.
//! * Each session carries a byte stream in either direction. Positions in a stream are
//!   cumulative byte offsets, starting at 0.
//! * There is no buffering of out-of-order data: the receiver acknowledges the contiguous prefix
//!   it has, and the sender re-sends everything after the acknowledged position until it is
//!   acknowledged. This is simple and robust on networks with moderate loss, at the price of
//!   throughput.
//! * Retransmission uses a fixed interval without backoff. There is no congestion control.
//! * A session has an absolute lifetime, regardless of activity. When it expires, the session
//!   is dropped without notifying the peer, which finds out through a `close` reply to its next
//!   frame.
//!
//! ## Frames
//!
//! Every datagram carries exactly one frame. Frames are text, with fields separated by `/` and
//!  surrounded by `/`:
//!
//! ```ascii
//! /connect/SESSION_ID/                         open a session (idempotent)
//! /data/SESSION_ID/POSITION/ESCAPED_PAYLOAD/   payload bytes starting at POSITION
//! /ack/SESSION_ID/LENGTH/                      all bytes before LENGTH were received
//! /close/SESSION_ID/                           close the session
//! ```
//!
//! Numbers are decimal and less than 2^31. In field content, `/` and `\` are escaped as `\/` and
//!  `\\`. Malformed frames are dropped without a reply.
//!
//! ## Processing
//!
//! * `connect` opens a session if there is none for the id, and is always answered with
//!   `/ack/SESSION_ID/0/`.
//! * `data` for an open session is delivered to the application if it continues the received
//!   stream (possibly overlapping with data that was received before), and ignored otherwise.
//!   Either way, it is answered with an `ack` for the number of bytes received so far.
//! * `ack` drops acknowledged bytes from the retransmission buffer. The rest is re-sent
//!   right away. Stale acks are ignored, while acks for bytes that were never sent are a
//!   protocol violation and close the session.
//! * `data` and `ack` for a session that does not exist (anymore) are answered with `close`.
//! * `close` closes the session if it exists, and is always answered with `close`.
//!
//! ## Structure
//!
//! Each session is an actor running in a tokio task of its own, owning its buffers and timers.
//!  The sessions of a peer are owned by that peer's [session_registry::SessionRegistry], which
//!  dispatches the peer's datagrams. [transport::udp::UdpServer] demultiplexes datagrams by
//!  source address and evicts idle peers. Applications plug in through
//!  [session_registry::SessionAcceptor], with [line_reversal::LineReversal] as the example.

pub mod config;
pub mod frame;
pub mod line_reversal;
pub mod session;
pub mod session_registry;
pub mod transport;
pub mod util;
pub mod test_util;
