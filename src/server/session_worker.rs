use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn, Instrument, Span};
use crate::config::SrtConfig;
use crate::error::{ErrorKind, SrtError};
use crate::pipeline::HandlerPipeline;
use crate::protocol::seq_no::SeqNo;
use crate::receive_window::{NoLossAction, WindowStreams};
use crate::server::batch_dispatcher::BatchDispatcher;
use crate::server::send_socket::{PeerLink, SendSocket};
use crate::session::{Session, SessionSnapshot, SessionState};
use crate::worker_pool::{PeerTaskHandle, PeerWorker};

pub enum SessionTask {
    /// a datagram received from the peer, processed in the span it was received in
    Datagram(Bytes, Span),
    /// the receive window delivered everything up to and including this sequence number
    Delivered(SeqNo),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Owns a peer's [Session]. All of the session's state changes happen here, one task at a
///  time, and this is where failures are turned into the session's reaction to them.
pub struct SessionWorker {
    session: Session,
    pipeline: Arc<HandlerPipeline>,
    dispatcher: Arc<dyn BatchDispatcher>,
    connected: bool,
    closed: bool,
}

impl SessionWorker {
    pub fn new(
        config: Arc<SrtConfig>,
        pipeline: Arc<HandlerPipeline>,
        dispatcher: Arc<dyn BatchDispatcher>,
        socket: Arc<dyn SendSocket>,
        peer: SocketAddr,
        handle: PeerTaskHandle<SessionTask>,
    ) -> SessionWorker {
        // acknowledging touches the session, so it is routed through the peer's queue
        let on_no_loss: NoLossAction = Arc::new(move |seq| {
            if !handle.submit(SessionTask::Delivered(seq)) {
                trace!("session worker is gone - not acknowledging #{}", seq);
            }
        });

        let (session, streams) = Session::new(config, PeerLink::new(socket, peer), on_no_loss);
        tokio::spawn(Self::forward_window_streams(peer, streams, dispatcher.clone()));

        SessionWorker {
            session,
            pipeline,
            dispatcher,
            connected: false,
            closed: false,
        }
    }

    async fn forward_window_streams(peer: SocketAddr, mut streams: WindowStreams, dispatcher: Arc<dyn BatchDispatcher>) {
        loop {
            select! {
                Some(batch) = streams.batches.recv() => dispatcher.on_batch(peer, batch).await,
                Some(loss) = streams.losses.recv() => dispatcher.on_loss(peer, loss).await,
                else => break,
            }
        }
        trace!("receive window of {:?} closed", peer);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    async fn on_datagram(&mut self, datagram: Bytes) {
        match self.pipeline.handle(&mut self.session, datagram, Instant::now()).await {
            Ok(stage) => trace!("datagram handled by {}", stage),
            Err(e) => self.on_error(e).await,
        }
        self.notify_lifecycle().await;
    }

    async fn on_error(&mut self, e: SrtError) {
        match e.kind() {
            ErrorKind::Format | ErrorKind::Capacity => {
                warn!("dropping datagram from {:?}: {}", self.session.peer(), e);
            }
            ErrorKind::ProtocolState => {
                warn!("protocol violation by {:?}: {}", self.session.peer(), e);
                if !self.session.state().is_terminal() {
                    self.session.set_state(SessionState::Illegal);
                }
                self.session.send_shutdown().await;
            }
            ErrorKind::PipelineExhausted => {
                error!("session with {:?}: {} - shutting down", self.session.peer(), e);
                self.session.set_state(SessionState::Shutdown);
                self.session.send_shutdown().await;
            }
            ErrorKind::Io => {
                error!("I/O error in session with {:?}: {}", self.session.peer(), e);
            }
        }
    }

    async fn notify_lifecycle(&mut self) {
        let state = self.session.state();
        if state == SessionState::Connect && !self.connected {
            self.connected = true;
            self.dispatcher.on_connect(self.session.peer(), self.session.stream_id().map(str::to_string)).await;
        }
        if state.is_terminal() && !self.closed {
            self.closed = true;
            info!("session with {:?} ended in state {:?}", self.session.peer(), state);
            if self.connected {
                self.dispatcher.on_close(self.session.peer()).await;
            }
        }
    }
}

#[async_trait]
impl PeerWorker for SessionWorker {
    type Task = SessionTask;

    async fn on_task(&mut self, task: SessionTask) -> anyhow::Result<()> {
        match task {
            SessionTask::Datagram(datagram, span) => {
                self.on_datagram(datagram)
                    .instrument(span)
                    .await;
            }
            SessionTask::Delivered(seq) => {
                self.session.on_delivered(seq, Instant::now()).await;
            }
            SessionTask::Snapshot(reply_to) => {
                if reply_to.send(self.session.snapshot().await).is_err() {
                    debug!("snapshot requester went away");
                }
            }
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.session.state().is_terminal()
    }

    /// The session was evicted or the server shuts down: a connected peer is told, and so is
    ///  the dispatcher.
    async fn on_stop(&mut self) {
        let state = self.session.state();
        if !state.is_terminal() {
            debug!("stopping session with {:?} in state {:?}", self.session.peer(), state);
            if state == SessionState::Connect {
                self.session.send_shutdown().await;
            }
            self.session.set_state(SessionState::Shutdown);
        }
        self.notify_lifecycle().await;
    }
}
