//! Processing of a single datagram is a pass through an ordered chain of stages. Each stage
//!  either consumes the packet or forwards it to the next stage:
//!
//! ```ascii
//! validate -> decode -> ack-ack -> shutdown -> keep-alive -> handshake -> data-stream
//! ```
//!
//! Stages hold no per-peer state: everything they touch lives in the [Session] they are
//!  handed, and the pipeline is shared by all sessions.

pub mod validate;
pub mod decode;
pub mod control_stages;
pub mod handshake;
pub mod data_stream;

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::trace;
use crate::config::SrtConfig;
use crate::error::SrtError;
use crate::protocol::handshake::HandshakeCif;
use crate::protocol::packet::{ControlPacket, DataPacket};
use crate::session::cookie::CookieGenerator;
use crate::session::Session;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Consumed,
    Forward,
}

/// a datagram after decoding
#[derive(Clone, Debug, PartialEq)]
pub enum InboundPacket {
    Data(DataPacket),
    Handshake(ControlPacket, HandshakeCif),
    Control(ControlPacket),
}

/// The unit of work passed along the chain: the datagram, its decoded form once the decoder
///  ran, and the session it belongs to.
pub struct Exchange<'a> {
    pub session: &'a mut Session,
    pub datagram: Bytes,
    pub packet: Option<InboundPacket>,
    pub now: Instant,
}

impl Exchange<'_> {
    fn describe(&self) -> String {
        match &self.packet {
            None => format!("undecoded datagram of {} bytes", self.datagram.len()),
            Some(InboundPacket::Data(p)) => format!("data packet #{}", p.seq),
            Some(InboundPacket::Handshake(_, cif)) => format!("{:?} handshake", cif.handshake_type),
            Some(InboundPacket::Control(p)) => format!("{:?} control packet", p.control_type),
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError>;
}

pub struct HandlerPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Debug for HandlerPipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl HandlerPipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> HandlerPipeline {
        HandlerPipeline { stages }
    }

    /// the regular chain of stages, in order
    pub fn standard(config: Arc<SrtConfig>) -> HandlerPipeline {
        let cookies = CookieGenerator::new(config.cookie_secret.clone());
        HandlerPipeline::new(vec![
            Box::new(validate::ValidateStage::new(config.max_packet_size)),
            Box::new(decode::DecodeStage),
            Box::new(control_stages::AckAckStage),
            Box::new(control_stages::ShutdownStage),
            Box::new(control_stages::KeepAliveStage),
            Box::new(handshake::HandshakeStage::new(config, cookies)),
            Box::new(data_stream::DataStreamStage),
        ])
    }

    /// Runs a datagram through the stages, returning the name of the stage that consumed it.
    ///  A datagram that no stage consumes is an error.
    pub async fn handle(&self, session: &mut Session, datagram: Bytes, now: Instant) -> Result<&'static str, SrtError> {
        let mut exchange = Exchange {
            session,
            datagram,
            packet: None,
            now,
        };

        for stage in &self.stages {
            if stage.handle(&mut exchange).await? == Flow::Consumed {
                trace!("consumed by stage {}", stage.name());
                return Ok(stage.name());
            }
        }
        Err(SrtError::NoHandler(exchange.describe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::error::ErrorKind;
    use crate::protocol::packet::ControlType;
    use crate::protocol::handshake::VERSION_5;
    use crate::session::SessionState;
    use crate::test_util::*;

    fn pipeline() -> HandlerPipeline {
        HandlerPipeline::standard(Arc::new(test_config()))
    }

    async fn connected_session(socket: &RecordingSocket) -> (Session, crate::receive_window::WindowStreams) {
        let pipeline = pipeline();
        let (mut session, streams) = test_session(socket);
        pipeline.handle(&mut session, induction_datagram(VERSION_5), Instant::now()).await.unwrap();
        let cookie = socket.sent_handshakes()[0].cookie;
        pipeline.handle(&mut session, conclusion_datagram(cookie, None), Instant::now()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connect);
        socket.clear();
        (session, streams)
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(format!("{:?}", pipeline()), r#"["validate", "decode", "ack-ack", "shutdown", "keep-alive", "handshake", "data-stream"]"#);
    }

    #[tokio::test]
    async fn test_shutdown_consumed_before_data_stream() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = connected_session(&socket).await;

        let consumed_by = pipeline().handle(&mut session, control_datagram(ControlType::Shutdown, 0), Instant::now()).await.unwrap();
        assert_eq!(consumed_by, "shutdown");
        assert_eq!(session.state(), SessionState::Shutdown);
        assert!(session.is_shutdown_sent());
        assert!(socket.sent().is_empty());
    }

    #[tokio::test]
    async fn test_data_rejected_before_connect() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);

        let err = pipeline().handle(&mut session, data_datagram(5), Instant::now()).await.unwrap_err();
        assert!(matches!(err, SrtError::NotConnected { state: SessionState::New, .. }));
        assert_eq!(session.window().used().await, 0);
    }

    #[tokio::test]
    async fn test_data_in_connect() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = connected_session(&socket).await;

        let pipeline = pipeline();
        for seq in [PEER_ISN, PEER_ISN + 2] {
            let consumed_by = pipeline.handle(&mut session, data_datagram(seq), Instant::now()).await.unwrap();
            assert_eq!(consumed_by, "data-stream");
        }
        assert_eq!(session.window().used().await, 3);
        assert_eq!(session.num_pending_acks(), 2);
        assert_eq!(session.last_seq.map(|s| s.to_raw()), Some(PEER_ISN + 2));
    }

    #[tokio::test]
    async fn test_window_full() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = connected_session(&socket).await;
        let capacity = session.window().capacity() as u32;

        let err = pipeline().handle(&mut session, data_datagram(PEER_ISN + capacity), Instant::now()).await;
        // an empty window re-anchors rather than rejecting
        assert!(err.is_ok());

        let err = pipeline().handle(&mut session, data_datagram(PEER_ISN + 2 * capacity), Instant::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
    }

    #[tokio::test]
    async fn test_ack_ack_in_connect() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = connected_session(&socket).await;

        let consumed_by = pipeline().handle(&mut session, control_datagram(ControlType::AckAck, 1), Instant::now()).await.unwrap();
        assert_eq!(consumed_by, "ack-ack");
    }

    #[rstest]
    #[case::keep_alive(ControlType::KeepAlive, Ok("keep-alive"))]
    #[case::shutdown(ControlType::Shutdown, Ok("shutdown"))]
    #[case::ack_ack(ControlType::AckAck, Err(ErrorKind::PipelineExhausted))]
    #[case::nak(ControlType::Nak, Err(ErrorKind::PipelineExhausted))]
    #[case::drop_request(ControlType::DropRequest, Err(ErrorKind::PipelineExhausted))]
    #[tokio::test]
    async fn test_control_before_connect(#[case] control_type: ControlType, #[case] expected: Result<&'static str, ErrorKind>) {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);

        let actual = pipeline().handle(&mut session, control_datagram(control_type, 0), Instant::now()).await
            .map_err(|e| e.kind());
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_header(vec![0x80, 0x00, 0x00])]
    #[case::oversized(vec![0; 1501])]
    #[case::truncated_handshake(vec![0x80, 0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,5])]
    #[tokio::test]
    async fn test_format_errors(#[case] datagram: Vec<u8>) {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);

        let err = pipeline().handle(&mut session, Bytes::from(datagram), Instant::now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(session.state(), SessionState::New);
    }

    #[tokio::test]
    async fn test_no_handler_description() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);

        let err = pipeline().handle(&mut session, control_datagram(ControlType::Nak, 0), Instant::now()).await.unwrap_err();
        assert_eq!(err.to_string(), "no handler matched Nak control packet");
    }
}
