//! The receiving side of an SRT-style reliable transport over UDP.
//!
//! Senders connect with a cookie-protected handshake, then stream sequenced data packets. The
//!  receiver acknowledges what it got, tracks what is missing, and hands gap-free runs of
//!  packets to a downstream consumer in sequence order.
//!
//! ## Design
//!
//! * There is one [session::Session] per peer address, holding the handshake state, socket
//!    ids, RTT estimate and the peer's [receive_window::ReceiveWindow].
//! * Each session is owned by a worker in a [worker_pool::PeerTaskPool]. A peer's datagrams
//!    are processed one at a time in arrival order, while different peers are processed in
//!    parallel. Nothing else touches a session.
//! * Processing a datagram is a pass through the [pipeline::HandlerPipeline]: validation,
//!    decoding, then the stage for the packet's kind.
//! * The receive window buffers data packets until there are no gaps, then delivers them as
//!    one batch and triggers an ACK. Gaps that stay open beyond a timeout are given up on:
//!    this is a live transport, and latency beats completeness.
//! * Errors are scoped to a single datagram or a single session; none is fatal to the
//!    process.
//!
//! ## Wire format
//!
//! All numbers are big-endian. Every packet starts with a 16 byte header whose first bit
//!  tells data packets (0) from control packets (1):
//!
//! ```ascii
//! data:    0 | seq (31 bits)
//!          position (2) | in-order (1) | key (2) | retransmitted (1) | message number (26)
//!          timestamp (u32, micros since session start)
//!          destination socket id (u32)
//!          payload
//!
//! control: 1 | control type (15 bits) | subtype (u16)
//!          type-specific information (u32)
//!          timestamp (u32, micros since session start)
//!          destination socket id (u32)
//!          control information field (CIF)
//! ```
//!
//! See [protocol::handshake] for the handshake CIF and [protocol::control] for the ACK CIF.
//!
//! Not supported: encryption, sending data, retransmission requests (loss is reported to the
//!  consumer, but no NAK is sent), congestion control.

pub mod config;
pub mod error;
pub mod util;
pub mod protocol;
pub mod receive_window;
pub mod session;
pub mod pipeline;
pub mod worker_pool;
pub mod server;

#[cfg(test)]
mod test_util;
