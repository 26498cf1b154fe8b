use async_trait::async_trait;
use tracing::trace;
use crate::error::SrtError;
use crate::pipeline::{Exchange, Flow, InboundPacket, Stage};

/// Feeds data packets into the session's receive window and registers them for
///  acknowledgement. This is the last stage: anything reaching it that is not a data packet
///  has no handler.
pub struct DataStreamStage;

#[async_trait]
impl Stage for DataStreamStage {
    fn name(&self) -> &'static str {
        "data-stream"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        let packet = match exchange.packet.take() {
            Some(InboundPacket::Data(packet)) => packet,
            other => {
                exchange.packet = other;
                return Ok(Flow::Forward);
            }
        };

        let seq = packet.seq;
        let session = &mut *exchange.session;
        if !session.window().append(packet).await {
            return Err(SrtError::WindowFull(seq));
        }
        trace!("buffered data packet #{}", seq);

        if session.last_seq.map_or(true, |last| seq.compare(last) > 0) {
            session.last_seq = Some(seq);
        }
        session.register_ack(seq, exchange.now);
        Ok(Flow::Consumed)
    }
}
