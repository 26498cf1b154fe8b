//! Stages for the simple control packets that only touch the session's bookkeeping

use async_trait::async_trait;
use tracing::{debug, info};
use crate::error::SrtError;
use crate::pipeline::{Exchange, Flow, InboundPacket, Stage};
use crate::protocol::packet::{ControlPacket, ControlType};
use crate::session::SessionState;

fn control_packet<'a>(exchange: &'a Exchange<'_>, control_type: ControlType) -> Option<&'a ControlPacket> {
    match &exchange.packet {
        Some(InboundPacket::Control(packet)) if packet.control_type == control_type => Some(packet),
        _ => None,
    }
}

/// ACK-ACKs are RTT samples, and they are only meaningful for a connected session
pub struct AckAckStage;

#[async_trait]
impl Stage for AckAckStage {
    fn name(&self) -> &'static str {
        "ack-ack"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        if exchange.session.state() != SessionState::Connect {
            return Ok(Flow::Forward);
        }
        let Some(ack_number) = control_packet(exchange, ControlType::AckAck).map(|p| p.type_info) else {
            return Ok(Flow::Forward);
        };
        exchange.session.on_ack_ack(ack_number, exchange.now);
        Ok(Flow::Consumed)
    }
}

pub struct ShutdownStage;

#[async_trait]
impl Stage for ShutdownStage {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        if control_packet(exchange, ControlType::Shutdown).is_none() {
            return Ok(Flow::Forward);
        }
        info!("peer {:?} shut down the session in state {:?}", exchange.session.peer(), exchange.session.state());
        exchange.session.set_state(SessionState::Shutdown);
        exchange.session.mark_shutdown_sent();
        Ok(Flow::Consumed)
    }
}

/// keep-alives carry no information beyond the peer being alive, which the decoder already recorded
pub struct KeepAliveStage;

#[async_trait]
impl Stage for KeepAliveStage {
    fn name(&self) -> &'static str {
        "keep-alive"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        if control_packet(exchange, ControlType::KeepAlive).is_none() {
            return Ok(Flow::Forward);
        }
        debug!("keep-alive from {:?}", exchange.session.peer());
        exchange.session.touch(exchange.now);
        Ok(Flow::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::time::Instant;
    use crate::test_util::{test_session, RecordingSocket};

    fn control(control_type: ControlType, type_info: u32) -> Option<InboundPacket> {
        Some(InboundPacket::Control(ControlPacket::new(control_type, type_info, 0, 0, Bytes::new())))
    }

    #[tokio::test]
    async fn test_ack_ack_forwards_unless_connected() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);
        let mut exchange = Exchange {
            session: &mut session,
            datagram: Bytes::new(),
            packet: control(ControlType::AckAck, 1),
            now: Instant::now(),
        };
        assert_eq!(AckAckStage.handle(&mut exchange).await.unwrap(), Flow::Forward);

        exchange.session.set_state(SessionState::Connect);
        assert_eq!(AckAckStage.handle(&mut exchange).await.unwrap(), Flow::Consumed);

        exchange.packet = control(ControlType::KeepAlive, 0);
        assert_eq!(AckAckStage.handle(&mut exchange).await.unwrap(), Flow::Forward);
    }

    #[tokio::test]
    async fn test_shutdown_stage() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);
        session.set_state(SessionState::Connect);
        let mut exchange = Exchange {
            session: &mut session,
            datagram: Bytes::new(),
            packet: control(ControlType::KeepAlive, 0),
            now: Instant::now(),
        };
        assert_eq!(ShutdownStage.handle(&mut exchange).await.unwrap(), Flow::Forward);
        assert_eq!(KeepAliveStage.handle(&mut exchange).await.unwrap(), Flow::Consumed);

        exchange.packet = control(ControlType::Shutdown, 0);
        assert_eq!(ShutdownStage.handle(&mut exchange).await.unwrap(), Flow::Consumed);
        assert_eq!(session.state(), SessionState::Shutdown);
        assert!(session.is_shutdown_sent());
    }
}
