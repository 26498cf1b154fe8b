//! The boundary between the UDP socket and the sessions: the [selector::Selector] reads
//!  datagrams and routes them to per-peer [session_worker::SessionWorker]s, which own the
//!  sessions and write responses through a [send_socket::SendSocket]. Received data leaves
//!  through a [batch_dispatcher::BatchDispatcher].

pub mod batch_dispatcher;
pub mod send_socket;
pub mod session_worker;
pub mod selector;
