use std::io;
use thiserror::Error;
use crate::protocol::seq_no::SeqNo;
use crate::session::SessionState;

/// Coarse classification of [SrtError], deciding how the owning session reacts to a failure.
///  No failure is ever fatal to the process: each one is scoped to a single datagram or a
///  single peer's session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// malformed or oversized datagrams - dropped without a response
    Format,
    /// a peer violated the handshake / connection state machine - the session is torn down
    ProtocolState,
    /// the task pool or a receive window is full - the caller applies its own admission policy
    Capacity,
    /// no pipeline stage claimed a packet - an internal defect, resolved by shutting the session down
    PipelineExhausted,
    Io,
}

#[derive(Debug, Error)]
pub enum SrtError {
    #[error("datagram of {size} bytes exceeds the maximum of {max} bytes")]
    Oversized { size: usize, max: usize },

    #[error("truncated {field}: {needed} bytes needed, {remaining} remaining")]
    Truncated { field: &'static str, needed: usize, remaining: usize },

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("handshake rejected in state {state:?}: {reason}")]
    HandshakeRejected { state: SessionState, reason: &'static str },

    #[error("cookie mismatch: issued {expected:#010x}, received {actual:#010x}")]
    CookieMismatch { expected: u32, actual: u32 },

    #[error("data packet #{seq} received in state {state:?}")]
    NotConnected { seq: SeqNo, state: SessionState },

    #[error("receive window is full, rejecting packet #{0}")]
    WindowFull(SeqNo),

    #[error("peer task pool is at its capacity of {0} peers")]
    PoolExhausted(usize),

    #[error("no handler matched {0}")]
    NoHandler(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SrtError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SrtError::Oversized { .. } | SrtError::Truncated { .. } | SrtError::Malformed(_) => ErrorKind::Format,
            SrtError::HandshakeRejected { .. } | SrtError::CookieMismatch { .. } | SrtError::NotConnected { .. } => ErrorKind::ProtocolState,
            SrtError::WindowFull(_) | SrtError::PoolExhausted(_) => ErrorKind::Capacity,
            SrtError::NoHandler(_) => ErrorKind::PipelineExhausted,
            SrtError::Io(_) => ErrorKind::Io,
        }
    }
}
