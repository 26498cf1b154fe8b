use async_trait::async_trait;
use tracing::trace;
use crate::error::SrtError;
use crate::pipeline::{Exchange, Flow, InboundPacket, Stage};
use crate::protocol::handshake::HandshakeCif;
use crate::protocol::packet::{ControlType, Packet};
use crate::session::SessionState;

/// Parses the datagram (including the handshake CIF for handshake packets) and stores the
///  result in the exchange. Data packets are only accepted for connected sessions.
pub struct DecodeStage;

#[async_trait]
impl Stage for DecodeStage {
    fn name(&self) -> &'static str {
        "decode"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        let packet = match Packet::deser(exchange.datagram.clone())? {
            Packet::Data(packet) => {
                let state = exchange.session.state();
                if state != SessionState::Connect {
                    return Err(SrtError::NotConnected { seq: packet.seq, state });
                }
                trace!("data packet #{} with {} bytes payload", packet.seq, packet.payload.len());
                InboundPacket::Data(packet)
            }
            Packet::Control(packet) if packet.control_type == ControlType::Handshake => {
                let cif = HandshakeCif::deser(packet.cif.clone())?;
                trace!("handshake {:?}", cif);
                InboundPacket::Handshake(packet, cif)
            }
            Packet::Control(packet) => {
                trace!("{:?} control packet", packet.control_type);
                InboundPacket::Control(packet)
            }
        };

        exchange.session.touch(exchange.now);
        exchange.packet = Some(packet);
        Ok(Flow::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use crate::protocol::handshake::{HandshakeType, VERSION_5};
    use crate::test_util::*;

    #[tokio::test]
    async fn test_decode_handshake() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);
        let mut exchange = Exchange {
            session: &mut session,
            datagram: induction_datagram(VERSION_5),
            packet: None,
            now: Instant::now(),
        };

        assert_eq!(DecodeStage.handle(&mut exchange).await.unwrap(), Flow::Forward);
        match exchange.packet {
            Some(InboundPacket::Handshake(packet, cif)) => {
                assert_eq!(packet.control_type, ControlType::Handshake);
                assert_eq!(cif.handshake_type, HandshakeType::Induction);
                assert_eq!(cif.socket_id, PEER_SOCKET_ID);
            }
            other => panic!("expected handshake, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_data_when_connected() {
        let socket = RecordingSocket::new();
        let (mut session, _streams) = test_session(&socket);
        session.set_state(SessionState::Connect);
        let mut exchange = Exchange {
            session: &mut session,
            datagram: data_datagram(42),
            packet: None,
            now: Instant::now(),
        };

        DecodeStage.handle(&mut exchange).await.unwrap();
        assert_eq!(exchange.packet, Some(InboundPacket::Data(data_packet(42))));
    }
}
