pub mod cookie;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use crate::config::SrtConfig;
use crate::protocol::control::AckInfo;
use crate::protocol::handshake::TsbpdExtension;
use crate::protocol::packet::ControlPacket;
use crate::protocol::seq_no::SeqNo;
use crate::receive_window::{NoLossAction, ReceiveWindow, WindowStreams};
use crate::server::send_socket::PeerLink;

/// how many sent ACKs are remembered for matching ACK-ACKs
const ACK_HISTORY_LEN: usize = 32;

/// Connection state of a session.
///
/// The regular progression is `New -> Open -> SetCookie -> Repeat -> Connect`; `Illegal`
///  and `Shutdown` are terminal and absorb any further packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SessionState {
    New,
    Open,
    SetCookie,
    Repeat,
    Connect,
    Illegal,
    Shutdown,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Illegal | SessionState::Shutdown)
    }
}

/// a received data packet waiting to be acknowledged
#[derive(Clone, Debug)]
pub struct AckAction {
    pub seq: SeqNo,
    pub registered_at: Instant,
}

/// A point-in-time copy of a session's externally interesting state
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub peer: SocketAddr,
    pub state: SessionState,
    pub local_socket_id: u32,
    pub peer_socket_id: u32,
    pub stream_id: Option<String>,
    pub mtu: u32,
    pub max_flow_window: u32,
    pub last_seq: Option<SeqNo>,
    pub rtt: Option<Duration>,
    pub rtt_variance: Option<Duration>,
    pub acks_sent: u32,
    pub window_used: usize,
    pub opened_at: Instant,
    pub last_activity: Instant,
}

/// Protocol state for one peer.
///
/// A session is only ever touched by the worker that owns its peer, so none of its fields
///  need synchronization. The receive window is the exception: its monitor runs in the
///  background and synchronizes internally.
pub struct Session {
    pub(crate) config: Arc<SrtConfig>,
    state: SessionState,
    link: PeerLink,

    pub(crate) local_socket_id: u32,
    pub(crate) peer_socket_id: u32,
    /// the cookie issued in the induction response
    pub(crate) cookie: Option<u32>,
    pub(crate) stream_id: Option<String>,
    pub(crate) mtu: u32,
    pub(crate) max_flow_window: u32,
    pub(crate) initial_seq: Option<SeqNo>,
    pub(crate) tsbpd: Option<TsbpdExtension>,
    pub(crate) last_seq: Option<SeqNo>,

    rtt: Option<Duration>,
    /// absolute difference between the two latest RTT samples
    rtt_variance: Option<Duration>,
    ack_number: u32,
    /// number and send time of the latest ACKs, oldest first, waiting for their ACK-ACK
    sent_acks: VecDeque<(u32, Instant)>,

    opened_at: Instant,
    /// when the conclusion was accepted, i.e. the approximate start of the handshake's round trip
    pub(crate) conclusion_received_at: Option<Instant>,
    last_activity: Instant,

    window: ReceiveWindow,
    pending_acks: VecDeque<AckAction>,
    shutdown_sent: bool,
}

impl Session {
    /// Creates a session in state `New` and spawns its receive window's monitor. The
    ///  returned streams carry the window's batches and loss reports.
    pub fn new(config: Arc<SrtConfig>, link: PeerLink, on_no_loss: NoLossAction) -> (Session, WindowStreams) {
        let now = Instant::now();
        let (mut window, streams) = ReceiveWindow::new(Arc::new(config.window.clone()), on_no_loss);
        window.spawn_monitor();

        let local_socket_id = rand::thread_rng().gen_range(1..=u32::MAX);
        info!("new session for {:?} with local socket id {:#010x}", link.peer(), local_socket_id);

        let session = Session {
            config,
            state: SessionState::New,
            link,
            local_socket_id,
            peer_socket_id: 0,
            cookie: None,
            stream_id: None,
            mtu: 0,
            max_flow_window: 0,
            initial_seq: None,
            tsbpd: None,
            last_seq: None,
            rtt: None,
            rtt_variance: None,
            ack_number: 0,
            sent_acks: VecDeque::with_capacity(ACK_HISTORY_LEN),
            opened_at: now,
            conclusion_received_at: None,
            last_activity: now,
            window,
            pending_acks: VecDeque::new(),
            shutdown_sent: false,
        };
        (session, streams)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if state != self.state {
            debug!("session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.link.peer()
    }

    pub fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn is_shutdown_sent(&self) -> bool {
        self.shutdown_sent
    }

    /// a peer-initiated shutdown needs no reply
    pub fn mark_shutdown_sent(&mut self) {
        self.shutdown_sent = true;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// packet timestamp: microseconds since the session was opened, wrapping at 32 bits
    pub fn timestamp(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.opened_at).as_micros() as u32
    }

    pub async fn send_control(&self, packet: &ControlPacket) {
        trace!("sending {:?} to {:?}", packet.control_type, self.peer());
        self.link.send(packet.to_bytes()).await;
    }

    /// sends a shutdown packet to the peer, at most once per session
    pub async fn send_shutdown(&mut self) {
        if self.shutdown_sent {
            return;
        }
        self.shutdown_sent = true;
        info!("sending shutdown to {:?}", self.peer());
        let packet = ControlPacket::shutdown(self.timestamp(Instant::now()), self.peer_socket_id);
        self.send_control(&packet).await;
    }

    pub fn register_ack(&mut self, seq: SeqNo, now: Instant) {
        self.pending_acks.push_back(AckAction { seq, registered_at: now });
    }

    pub fn num_pending_acks(&self) -> usize {
        self.pending_acks.len()
    }

    /// Called after the receive window delivered everything up to and including `last`:
    ///  resolves the pending ack actions covered by it with a single ACK.
    pub async fn on_delivered(&mut self, last: SeqNo, now: Instant) {
        if self.state != SessionState::Connect {
            debug!("delivery up to #{} in state {:?} - not acknowledging", last, self.state);
            return;
        }

        // packets may have arrived out of order, so the whole queue is checked
        let num_pending = self.pending_acks.len();
        self.pending_acks.retain(|action| {
            let covered = action.seq.compare(last) <= 0;
            if covered {
                trace!("acknowledging #{} after {:?}", action.seq, now.saturating_duration_since(action.registered_at));
            }
            !covered
        });
        let num_resolved = num_pending - self.pending_acks.len();
        if num_resolved == 0 {
            trace!("no pending acks up to #{}", last);
            return;
        }

        self.ack_number = self.ack_number.wrapping_add(1);
        let available_window = self.window.capacity().saturating_sub(self.window.used().await);
        let info = AckInfo {
            next_expected: last.next(),
            rtt: self.rtt.unwrap_or(self.config.default_rtt).as_micros() as u32,
            rtt_variance: self.rtt_variance.unwrap_or(self.config.default_rtt_variance).as_micros() as u32,
            available_window: available_window as u32,
            packet_rate: self.config.reported_packet_rate,
            bandwidth: self.config.reported_bandwidth,
            receive_rate: self.config.reported_receive_rate,
        };
        debug!("sending ACK #{} up to #{} ({} packets)", self.ack_number, last, num_resolved);

        let packet = ControlPacket::ack(self.ack_number, self.timestamp(now), self.peer_socket_id, &info);
        self.send_control(&packet).await;

        if self.sent_acks.len() == ACK_HISTORY_LEN {
            self.sent_acks.pop_front();
        }
        self.sent_acks.push_back((self.ack_number, now));
    }

    /// RTT sample from an ACK-ACK: twice the time since the acknowledged ACK was sent. The
    ///  ACK may be older than the latest one; ACKs sent before it are not waited for anymore.
    pub fn on_ack_ack(&mut self, ack_number: u32, now: Instant) {
        let Some(idx) = self.sent_acks.iter().position(|&(n, _)| n == ack_number) else {
            debug!("ACK-ACK #{} does not match a recent ACK - ignoring", ack_number);
            return;
        };
        let Some((_, sent_at)) = self.sent_acks.drain(..=idx).last() else {
            return;
        };

        let rtt = now.saturating_duration_since(sent_at) * 2;
        let variance = match self.rtt {
            Some(previous) if previous > rtt => previous - rtt,
            Some(previous) => rtt - previous,
            None => Duration::ZERO,
        };
        trace!("RTT sample {:?}, variance {:?}", rtt, variance);
        self.rtt = Some(rtt);
        self.rtt_variance = Some(variance);
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// the absolute (unsigned) difference between the two latest RTT samples
    pub fn rtt_variance(&self) -> Option<Duration> {
        self.rtt_variance
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            peer: self.peer(),
            state: self.state,
            local_socket_id: self.local_socket_id,
            peer_socket_id: self.peer_socket_id,
            stream_id: self.stream_id.clone(),
            mtu: self.mtu,
            max_flow_window: self.max_flow_window,
            last_seq: self.last_seq,
            rtt: self.rtt,
            rtt_variance: self.rtt_variance,
            acks_sent: self.ack_number,
            window_used: self.window.used().await,
            opened_at: self.opened_at,
            last_activity: self.last_activity,
        }
    }
}
