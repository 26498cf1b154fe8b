use std::sync::Arc;
use std::time::SystemTime;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info};
use crate::config::SrtConfig;
use crate::error::SrtError;
use crate::pipeline::{Exchange, Flow, InboundPacket, Stage};
use crate::protocol::handshake::{encode_peer_ip, HandshakeCif, HandshakeExtension, HandshakeType, TsbpdExtension, EXT_FLAG_HSREQ, EXT_TYPE_HS_RSP, HS_V5_MAGIC, SRT_VERSION, VERSION_4, VERSION_5};
use crate::protocol::packet::ControlPacket;
use crate::session::cookie::CookieGenerator;
use crate::session::{Session, SessionState};

/// Drives the handshake part of the session state machine:
///
/// ```ascii
/// New --induction--> Open --induction response--> SetCookie
///     --conclusion with our cookie--> Repeat --conclusion response--> Connect
/// ```
///
/// A conclusion carrying a different cookie makes the session `Illegal`. Any other handshake
///  that leaves the session in neither `Open` nor `Repeat` is rejected, and the session is
///  shut down. Retransmitted inductions (while waiting for the conclusion) and retransmitted
///  conclusions (after connecting) are answered with the same response again.
pub struct HandshakeStage {
    config: Arc<SrtConfig>,
    cookies: CookieGenerator,
}

impl HandshakeStage {
    pub fn new(config: Arc<SrtConfig>, cookies: CookieGenerator) -> HandshakeStage {
        HandshakeStage { config, cookies }
    }

    fn induction_response(&self, session: &Session, request: &HandshakeCif, cookie: u32) -> HandshakeCif {
        HandshakeCif {
            version: VERSION_5,
            encryption: 0,
            extension_field: HS_V5_MAGIC,
            initial_seq: request.initial_seq,
            mtu: request.mtu,
            max_flow_window: request.max_flow_window,
            handshake_type: HandshakeType::Induction,
            socket_id: session.local_socket_id,
            cookie,
            peer_ip: encode_peer_ip(session.peer().ip()),
            extensions: Bytes::new(),
        }
    }

    /// Answers with the parameters the session accepted, so a repeated conclusion after
    ///  connecting gets the same response even if it carries different values.
    fn conclusion_response(&self, session: &Session, request: &HandshakeCif) -> HandshakeCif {
        let requested = session.tsbpd;
        let tsbpd = TsbpdExtension {
            srt_version: SRT_VERSION,
            srt_flags: requested.map(|t| t.srt_flags).unwrap_or(0),
            receiver_delay: (self.config.receiver_latency.as_millis() as u16)
                .max(requested.map(|t| t.receiver_delay).unwrap_or(0)),
            sender_delay: (self.config.sender_latency.as_millis() as u16)
                .max(requested.map(|t| t.sender_delay).unwrap_or(0)),
        };
        let mut extensions = BytesMut::new();
        tsbpd.to_record(EXT_TYPE_HS_RSP).ser(&mut extensions);

        HandshakeCif {
            version: VERSION_5,
            encryption: 0,
            extension_field: EXT_FLAG_HSREQ,
            initial_seq: session.initial_seq.unwrap_or(request.initial_seq),
            mtu: session.mtu,
            max_flow_window: session.max_flow_window,
            handshake_type: HandshakeType::Conclusion,
            socket_id: session.local_socket_id,
            cookie: session.cookie.unwrap_or(request.cookie),
            peer_ip: encode_peer_ip(session.peer().ip()),
            extensions: extensions.freeze(),
        }
    }

    async fn send(session: &Session, cif: &HandshakeCif, now: tokio::time::Instant) {
        debug!("sending {:?} handshake response to {:?}", cif.handshake_type, session.peer());
        let packet = ControlPacket::handshake(session.timestamp(now), session.peer_socket_id, cif);
        session.send_control(&packet).await;
    }

    /// takes the negotiated parameters from a conclusion whose cookie was verified
    fn accept_conclusion(session: &mut Session, request: &HandshakeCif, extensions: Vec<HandshakeExtension>) {
        session.peer_socket_id = request.socket_id;
        session.initial_seq = Some(request.initial_seq);
        session.mtu = request.mtu;
        session.max_flow_window = request.max_flow_window;
        for extension in extensions {
            match extension {
                HandshakeExtension::Tsbpd(tsbpd) => session.tsbpd = Some(tsbpd),
                HandshakeExtension::StreamId(stream_id) => session.stream_id = Some(stream_id),
                HandshakeExtension::Other(record) => debug!("ignoring handshake extension type {}", record.ext_type),
            }
        }
    }
}

#[async_trait]
impl Stage for HandshakeStage {
    fn name(&self) -> &'static str {
        "handshake"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        let Some(InboundPacket::Handshake(_, request)) = &exchange.packet else {
            return Ok(Flow::Forward);
        };
        let session = &mut *exchange.session;
        let now = exchange.now;
        let initial_state = session.state();

        if initial_state.is_terminal() {
            debug!("{:?} handshake for a session in state {:?} - ignoring", request.handshake_type, initial_state);
            return Ok(Flow::Consumed);
        }
        if initial_state == SessionState::Connect {
            if request.handshake_type == HandshakeType::Conclusion {
                debug!("repeated conclusion after connect - re-sending response");
                Self::send(session, &self.conclusion_response(session, request), now).await;
            }
            return Ok(Flow::Consumed);
        }

        match request.handshake_type {
            HandshakeType::Induction => {
                if request.version == VERSION_4 || initial_state == SessionState::New {
                    session.peer_socket_id = request.socket_id;
                    session.set_state(SessionState::Open);
                }
                else if initial_state == SessionState::SetCookie {
                    if let Some(cookie) = session.cookie {
                        debug!("repeated induction - re-sending response");
                        Self::send(session, &self.induction_response(session, request, cookie), now).await;
                        return Ok(Flow::Consumed);
                    }
                }
            }
            HandshakeType::Conclusion if initial_state == SessionState::SetCookie => {
                // a malformed extension block is a format error and leaves the session untouched
                let extensions = request.parse_extensions()?;

                let expected = session.cookie.unwrap_or(0);
                if session.cookie != Some(request.cookie) {
                    session.set_state(SessionState::Illegal);
                    return Err(SrtError::CookieMismatch { expected, actual: request.cookie });
                }

                Self::accept_conclusion(session, request, extensions);
                session.conclusion_received_at = Some(now);
                session.set_state(SessionState::Repeat);
            }
            _ => {}
        }

        match session.state() {
            SessionState::Open => {
                let cookie = self.cookies.cookie(session.peer(), SystemTime::now());
                session.cookie = Some(cookie);
                Self::send(session, &self.induction_response(session, request, cookie), now).await;
                session.set_state(SessionState::SetCookie);
            }
            SessionState::Repeat => {
                Self::send(session, &self.conclusion_response(session, request), now).await;
                if let Some(initial_seq) = session.initial_seq {
                    session.window().anchor(initial_seq).await;
                }
                session.set_state(SessionState::Connect);
                info!("session with {:?} connected, stream id {:?}", session.peer(), session.stream_id());
            }
            _ => {
                session.set_state(SessionState::Shutdown);
                return Err(SrtError::HandshakeRejected {
                    state: initial_state,
                    reason: "handshake type not expected in this state",
                });
            }
        }
        Ok(Flow::Consumed)
    }
}
