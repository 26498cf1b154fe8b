use std::net::SocketAddr;
use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, span, trace, warn, Instrument, Level, Span};
use uuid::Uuid;
use crate::config::SrtConfig;
use crate::error::SrtError;
use crate::pipeline::HandlerPipeline;
use crate::server::batch_dispatcher::BatchDispatcher;
use crate::server::send_socket::SendSocket;
use crate::server::session_worker::{SessionTask, SessionWorker};
use crate::session::SessionSnapshot;
use crate::worker_pool::{PeerTaskHandle, PeerTaskPool, WorkerFactory};

type SessionPool = PeerTaskPool<SocketAddr, SessionWorker>;

/// Demultiplexes datagrams by peer address: the first datagram from an unknown address
///  starts a new session, everything else is queued on the existing session's worker.
///
/// The selector never touches a session itself. Cross-session reads like
///  [Selector::session_snapshot] are answered by the session's worker.
pub struct Selector {
    pool: Arc<SessionPool>,
    local_addr: Option<SocketAddr>,
    recv_handle: Option<JoinHandle<()>>,
}

impl Drop for Selector {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

impl Selector {
    /// binds the UDP socket and starts receiving
    pub async fn bind(config: SrtConfig, dispatcher: Arc<dyn BatchDispatcher>) -> anyhow::Result<Selector> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.listen_addr).await?);
        info!("listening on {:?}", UdpSocket::local_addr(&socket)?);

        let receive_buffer_size = config.receive_buffer_size;
        let mut selector = Selector::new(Arc::new(config), Arc::new(socket.clone()), dispatcher)?;
        selector.recv_handle = Some(tokio::spawn(Self::recv_loop(socket, receive_buffer_size, selector.pool.clone())));
        Ok(selector)
    }

    /// Creates a selector writing to a given socket without a receive loop: datagrams are
    ///  passed in through [Selector::on_datagram].
    pub fn new(config: Arc<SrtConfig>, socket: Arc<dyn SendSocket>, dispatcher: Arc<dyn BatchDispatcher>) -> anyhow::Result<Selector> {
        config.validate()?;

        let local_addr = socket.local_addr();
        let pipeline = Arc::new(HandlerPipeline::standard(config.clone()));
        let max_peers = config.max_peers;

        let factory: WorkerFactory<SocketAddr, SessionWorker> = Arc::new(move |peer: &SocketAddr, handle: PeerTaskHandle<SessionTask>| {
            SessionWorker::new(config.clone(), pipeline.clone(), dispatcher.clone(), socket.clone(), *peer, handle)
        });

        Ok(Selector {
            pool: Arc::new(PeerTaskPool::new(max_peers, factory)),
            local_addr,
            recv_handle: None,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn recv_loop(socket: Arc<UdpSocket>, receive_buffer_size: usize, pool: Arc<SessionPool>) {
        info!("starting receive loop");

        let mut buf = vec![0u8; receive_buffer_size];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id, peer = ?from);
            let datagram = Bytes::copy_from_slice(&buf[..num_read]);

            async {
                trace!("received {} bytes", num_read);
                if let Err(e) = Self::submit(&pool, from, datagram).await {
                    warn!("dropping datagram from {:?}: {}", from, e);
                }
            }
                .instrument(span)
                .await;
        }
    }

    async fn submit(pool: &SessionPool, peer: SocketAddr, datagram: Bytes) -> Result<(), SrtError> {
        pool.execute(peer, SessionTask::Datagram(datagram, Span::current())).await
    }

    /// Routes a datagram to the peer's session, creating the session if necessary. Fails if
    ///  a new session is needed but the maximum number of peers is reached.
    pub async fn on_datagram(&self, peer: SocketAddr, datagram: Bytes) -> Result<(), SrtError> {
        Self::submit(&self.pool, peer, datagram).await
    }

    /// a copy of a session's current state, `None` if there is no session for the peer
    pub async fn session_snapshot(&self, peer: SocketAddr) -> Option<SessionSnapshot> {
        let (sender, receiver) = oneshot::channel();
        if !self.pool.execute_if_present(&peer, SessionTask::Snapshot(sender)).await {
            return None;
        }
        receiver.await.ok()
    }

    /// Removes a peer's session after it processed the datagrams already queued for it
    pub async fn evict(&self, peer: SocketAddr) -> bool {
        info!("evicting session with {:?}", peer);
        self.pool.remove(&peer).await
    }

    pub async fn active_peers(&self) -> Vec<SocketAddr> {
        self.pool.active_peers().await
    }

    /// stops receiving and ends all sessions
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
        self.pool.shutdown_all().await;
    }
}
