use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::SrtError;
use crate::protocol::seq_no::SeqNo;
use crate::util::buf_ext::WireBuf;

pub const HEADER_LEN: usize = 16;

const CONTROL_FLAG: u32 = 0x8000_0000;
const CONTROL_FLAG_U16: u16 = 0x8000;
const MESSAGE_NUMBER_MASK: u32 = 0x03FF_FFFF;

/// Control types are a closed set - anything else is rejected as malformed
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ControlType {
    Handshake = 0x0000,
    KeepAlive = 0x0001,
    Ack = 0x0002,
    Nak = 0x0003,
    CongestionWarning = 0x0004,
    Shutdown = 0x0005,
    AckAck = 0x0006,
    DropRequest = 0x0007,
    PeerError = 0x0008,
    UserDefined = 0x7FFF,
}

/// position of a data packet inside its message
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketPosition {
    Middle = 0b00,
    Last = 0b01,
    First = 0b10,
    Solo = 0b11,
}

/// the first bit of a datagram distinguishes data from control packets
pub fn is_control_packet(datagram: &[u8]) -> bool {
    datagram.first()
        .map(|b| b & 0x80 != 0)
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Data(DataPacket),
    Control(ControlPacket),
}

impl Packet {
    pub fn deser(datagram: Bytes) -> Result<Packet, SrtError> {
        if is_control_packet(&datagram) {
            Ok(Packet::Control(ControlPacket::deser(datagram)?))
        }
        else {
            Ok(Packet::Data(DataPacket::deser(datagram)?))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataPacket {
    pub seq: SeqNo,
    pub position: PacketPosition,
    pub in_order: bool,
    pub key_flags: u8,
    pub retransmitted: bool,
    pub message_number: u32,
    pub timestamp: u32,
    pub dst_socket_id: u32,
    /// shares the received datagram's buffer
    pub payload: Bytes,
}

impl DataPacket {
    pub fn deser(mut buf: Bytes) -> Result<DataPacket, SrtError> {
        let seq = buf.read_u32("data sequence number")?;
        if seq & CONTROL_FLAG != 0 {
            return Err(SrtError::Malformed("control flag set in data packet".to_string()));
        }
        let flags_and_msg = buf.read_u32("data message number")?;
        let timestamp = buf.read_u32("data timestamp")?;
        let dst_socket_id = buf.read_u32("data destination socket id")?;

        let flags = (flags_and_msg >> 24) as u8;
        let position = PacketPosition::try_from((flags & 0xC0) >> 6)
            .map_err(|e| SrtError::Malformed(e.to_string()))?;

        Ok(DataPacket {
            seq: SeqNo::new(seq),
            position,
            in_order: flags & 0x20 != 0,
            key_flags: (flags & 0x18) >> 3,
            retransmitted: flags & 0x04 != 0,
            message_number: flags_and_msg & MESSAGE_NUMBER_MASK,
            timestamp,
            dst_socket_id,
            payload: buf,
        })
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq.to_raw());

        let mut flags = u8::from(self.position) << 6;
        if self.in_order {
            flags |= 0x20;
        }
        flags |= (self.key_flags & 0b11) << 3;
        if self.retransmitted {
            flags |= 0x04;
        }
        buf.put_u32(((flags as u32) << 24) | (self.message_number & MESSAGE_NUMBER_MASK));
        buf.put_u32(self.timestamp);
        buf.put_u32(self.dst_socket_id);
        buf.put_slice(&self.payload);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ControlPacket {
    pub control_type: ControlType,
    pub subtype: u16,
    pub type_info: u32,
    pub timestamp: u32,
    pub dst_socket_id: u32,
    /// control information field - shares the received datagram's buffer
    pub cif: Bytes,
}

impl ControlPacket {
    pub fn new(control_type: ControlType, type_info: u32, timestamp: u32, dst_socket_id: u32, cif: Bytes) -> ControlPacket {
        ControlPacket {
            control_type,
            subtype: 0,
            type_info,
            timestamp,
            dst_socket_id,
            cif,
        }
    }

    pub fn deser(mut buf: Bytes) -> Result<ControlPacket, SrtError> {
        let raw_type = buf.read_u16("control type")?;
        if raw_type & CONTROL_FLAG_U16 == 0 {
            return Err(SrtError::Malformed("control flag not set in control packet".to_string()));
        }
        let raw_type = raw_type & !CONTROL_FLAG_U16;
        let control_type = ControlType::try_from(raw_type)
            .map_err(|_| SrtError::Malformed(format!("unknown control type {:#06x}", raw_type)))?;

        let subtype = buf.read_u16("control subtype")?;
        let type_info = buf.read_u32("control type-specific information")?;
        let timestamp = buf.read_u32("control timestamp")?;
        let dst_socket_id = buf.read_u32("control destination socket id")?;

        Ok(ControlPacket {
            control_type,
            subtype,
            type_info,
            timestamp,
            dst_socket_id,
            cif: buf,
        })
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16(u16::from(self.control_type) | CONTROL_FLAG_U16);
        buf.put_u16(self.subtype);
        buf.put_u32(self.type_info);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.dst_socket_id);
        buf.put_slice(&self.cif);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.cif.len());
        self.ser(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_deser_data_packet() {
        let datagram = Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x64,  // seq 100
            0xE4, 0x00, 0x00, 0x07,  // solo, in order, not encrypted, retransmitted, msg 7
            0x00, 0x00, 0x01, 0x00,  // timestamp
            0x12, 0x34, 0x56, 0x78,  // dst socket id
            0xAA, 0xBB, 0xCC,
        ]);

        match Packet::deser(datagram).unwrap() {
            Packet::Data(p) => {
                assert_eq!(p.seq, SeqNo::new(100));
                assert_eq!(p.position, PacketPosition::Solo);
                assert!(p.in_order);
                assert_eq!(p.key_flags, 0);
                assert!(p.retransmitted);
                assert_eq!(p.message_number, 7);
                assert_eq!(p.timestamp, 256);
                assert_eq!(p.dst_socket_id, 0x1234_5678);
                assert_eq!(p.payload.as_ref(), &[0xAA, 0xBB, 0xCC]);
            }
            other => panic!("expected data packet, got {:?}", other),
        }
    }

    #[test]
    fn test_data_packet_ser() {
        let packet = DataPacket {
            seq: SeqNo::new(0x7FFF_FFFF),
            position: PacketPosition::First,
            in_order: false,
            key_flags: 0b10,
            retransmitted: false,
            message_number: 0x03FF_FFFF,
            timestamp: 1,
            dst_socket_id: 2,
            payload: Bytes::from_static(b"ts"),
        };
        let mut buf = BytesMut::new();
        packet.ser(&mut buf);
        assert_eq!(buf.as_ref(), &[0x7F,0xFF,0xFF,0xFF, 0x93,0xFF,0xFF,0xFF, 0,0,0,1, 0,0,0,2, b't', b's']);
        assert_eq!(DataPacket::deser(buf.freeze()).unwrap(), packet);
    }

    #[test]
    fn test_deser_control_packet() {
        let datagram = Bytes::from_static(&[
            0x80, 0x06, 0x00, 0x00,  // ack-ack
            0x00, 0x00, 0x00, 0x11,  // ack number 17
            0x00, 0x00, 0x00, 0x20,
            0x00, 0x00, 0x00, 0x30,
        ]);
        match Packet::deser(datagram).unwrap() {
            Packet::Control(p) => {
                assert_eq!(p.control_type, ControlType::AckAck);
                assert_eq!(p.type_info, 17);
                assert_eq!(p.timestamp, 0x20);
                assert_eq!(p.dst_socket_id, 0x30);
                assert!(p.cif.is_empty());
            }
            other => panic!("expected control packet, got {:?}", other),
        }
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::short_data(vec![0, 0, 0, 1, 0, 0])]
    #[case::short_control(vec![0x80, 0x05, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])]
    #[case::unknown_control_type(vec![0x80, 0x09, 0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0])]
    fn test_deser_malformed(#[case] datagram: Vec<u8>) {
        assert!(Packet::deser(Bytes::from(datagram)).is_err());
    }

    #[test]
    fn test_control_roundtrip_sets_flag() {
        let packet = ControlPacket::new(ControlType::Shutdown, 0, 99, 0xABCD, Bytes::from_static(&[0, 0, 0, 0]));
        let bytes = packet.to_bytes();
        assert!(is_control_packet(&bytes));
        assert_eq!(&bytes[..2], &[0x80, 0x05]);
        assert_eq!(ControlPacket::deser(bytes).unwrap(), packet);
    }
}
