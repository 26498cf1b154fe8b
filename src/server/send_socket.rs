use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// The outbound half of the UDP socket. Sending is fire-and-forget: failures are logged, and
///  the protocol's own retransmission handles lost responses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> Option<SocketAddr>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending {} bytes to {:?}", packet_buf.len(), to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.as_ref().local_addr().ok()
    }
}

/// A session's capability to write to its peer: the shared socket plus the peer's address.
///  The session does not own the socket.
#[derive(Clone)]
pub struct PeerLink {
    socket: Arc<dyn SendSocket>,
    peer: SocketAddr,
}

impl PeerLink {
    pub fn new(socket: Arc<dyn SendSocket>, peer: SocketAddr) -> PeerLink {
        PeerLink { socket, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, packet_buf: Bytes) {
        self.socket.do_send_packet(self.peer, &packet_buf).await;
    }
}
