use bytes::{BufMut, Bytes, BytesMut};
use crate::error::SrtError;
use crate::protocol::handshake::HandshakeCif;
use crate::protocol::packet::{ControlPacket, ControlType};
use crate::protocol::seq_no::SeqNo;
use crate::util::buf_ext::WireBuf;

/// CIF of an ACK control packet. The ACK number itself travels in the header's
///  type-specific information.
///
/// ```ascii
///  0: last delivered sequence number + 1 (u32)
///  4: RTT (u32, micros)
///  8: RTT variance (u32, micros)
/// 12: available flow window (u32, packets)
/// 16: packet receive rate (u32, packets / second)
/// 20: estimated link bandwidth (u32, packets / second)
/// 24: receive rate (u32, bytes / second)
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckInfo {
    pub next_expected: SeqNo,
    pub rtt: u32,
    pub rtt_variance: u32,
    pub available_window: u32,
    pub packet_rate: u32,
    pub bandwidth: u32,
    pub receive_rate: u32,
}

impl AckInfo {
    pub const SERIALIZED_LEN: usize = 28;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.next_expected.to_raw());
        buf.put_u32(self.rtt);
        buf.put_u32(self.rtt_variance);
        buf.put_u32(self.available_window);
        buf.put_u32(self.packet_rate);
        buf.put_u32(self.bandwidth);
        buf.put_u32(self.receive_rate);
    }

    pub fn deser(mut buf: Bytes) -> Result<AckInfo, SrtError> {
        Ok(AckInfo {
            next_expected: SeqNo::new(buf.read_u32("ack sequence number")?),
            rtt: buf.read_u32("ack rtt")?,
            rtt_variance: buf.read_u32("ack rtt variance")?,
            available_window: buf.read_u32("ack available window")?,
            packet_rate: buf.read_u32("ack packet rate")?,
            bandwidth: buf.read_u32("ack bandwidth")?,
            receive_rate: buf.read_u32("ack receive rate")?,
        })
    }
}

impl ControlPacket {
    pub fn ack(ack_number: u32, timestamp: u32, dst_socket_id: u32, info: &AckInfo) -> ControlPacket {
        let mut cif = BytesMut::with_capacity(AckInfo::SERIALIZED_LEN);
        info.ser(&mut cif);
        ControlPacket::new(ControlType::Ack, ack_number, timestamp, dst_socket_id, cif.freeze())
    }

    /// the shutdown CIF is a single reserved word
    pub fn shutdown(timestamp: u32, dst_socket_id: u32) -> ControlPacket {
        ControlPacket::new(ControlType::Shutdown, 0, timestamp, dst_socket_id, Bytes::from_static(&[0, 0, 0, 0]))
    }

    pub fn handshake(timestamp: u32, dst_socket_id: u32, cif: &HandshakeCif) -> ControlPacket {
        ControlPacket::new(ControlType::Handshake, 0, timestamp, dst_socket_id, cif.to_bytes())
    }
}
