//! Wire format of the protocol. All numbers are big-endian (network byte order).
//!
//! Every packet starts with a 16 byte header whose first bit tells data (0) from
//!  control (1) packets:
//!
//! ```ascii
//! data packet:
//!  0: 0 | packet sequence number (31 bits)
//!  4: position (2 bits) | order (1 bit) | key flags (2 bits) | retransmitted (1 bit) | message number (26 bits)
//!  8: timestamp (u32, micros since the session was opened)
//! 12: destination socket id (u32)
//! 16: payload
//!
//! control packet:
//!  0: 1 | control type (15 bits)
//!  2: subtype (u16)
//!  4: type-specific information (u32)
//!  8: timestamp (u32)
//! 12: destination socket id (u32)
//! 16: control information field (CIF), depending on the control type
//! ```
//!
//! The handshake CIF and its extensions are described in [handshake], ACK and shutdown CIFs
//!  in [control].

pub mod seq_no;
pub mod packet;
pub mod handshake;
pub mod control;
