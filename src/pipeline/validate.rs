use async_trait::async_trait;
use tracing::trace;
use crate::error::SrtError;
use crate::pipeline::{Exchange, Flow, Stage};

/// rejects datagrams exceeding the maximum packet size before any parsing happens
pub struct ValidateStage {
    max_packet_size: usize,
}

impl ValidateStage {
    pub fn new(max_packet_size: usize) -> ValidateStage {
        ValidateStage { max_packet_size }
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn handle(&self, exchange: &mut Exchange<'_>) -> Result<Flow, SrtError> {
        let size = exchange.datagram.len();
        if size > self.max_packet_size {
            return Err(SrtError::Oversized { size, max: self.max_packet_size });
        }
        trace!("datagram of {} bytes", size);
        Ok(Flow::Forward)
    }
}
