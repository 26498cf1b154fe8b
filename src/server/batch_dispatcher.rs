use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use crate::protocol::packet::DataPacket;
use crate::receive_window::LossRange;

/// Downstream consumer of what the sessions receive. A peer's batches and loss reports arrive
///  in order, calls for different peers may be concurrent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchDispatcher: Send + Sync + 'static {
    /// the handshake with a peer completed
    async fn on_connect(&self, peer: SocketAddr, stream_id: Option<String>);

    /// an in-order, gap-free run of data packets
    async fn on_batch(&self, peer: SocketAddr, packets: Vec<DataPacket>);

    /// sequence ranges that are currently missing
    async fn on_loss(&self, peer: SocketAddr, ranges: Vec<LossRange>);

    /// the session ended, either by shutdown or by a protocol violation
    async fn on_close(&self, peer: SocketAddr);
}
