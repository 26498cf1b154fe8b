//! Builders for packets and sessions plus a socket that records what was sent, shared by the
//!  unit tests of the crate's modules.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use crate::config::SrtConfig;
use crate::protocol::handshake::{encode_stream_id, ExtensionRecord, HandshakeCif, HandshakeType, TsbpdExtension, EXT_FLAG_HSREQ, EXT_TYPE_HS_REQ, EXT_TYPE_STREAM_ID, SRT_VERSION, VERSION_4, VERSION_5};
use crate::protocol::packet::{ControlPacket, ControlType, DataPacket, PacketPosition};
use crate::protocol::seq_no::SeqNo;
use crate::receive_window::WindowStreams;
use crate::server::send_socket::{PeerLink, SendSocket};
use crate::session::Session;

pub fn test_peer() -> SocketAddr {
    SocketAddr::from(([192, 168, 0, 17], 40000))
}

pub fn test_config() -> SrtConfig {
    SrtConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
}

pub fn test_session(socket: &RecordingSocket) -> (Session, WindowStreams) {
    let link = PeerLink::new(Arc::new(socket.clone()), test_peer());
    Session::new(Arc::new(test_config()), link, Arc::new(|_| {}))
}

pub fn data_packet(seq: u32) -> DataPacket {
    DataPacket {
        seq: SeqNo::new(seq),
        position: PacketPosition::Solo,
        in_order: false,
        key_flags: 0,
        retransmitted: false,
        message_number: seq & 0x03FF_FFFF,
        timestamp: 0,
        dst_socket_id: 0,
        payload: Bytes::from(format!("payload {}", seq)),
    }
}

pub fn data_datagram(seq: u32) -> Bytes {
    let mut buf = BytesMut::new();
    data_packet(seq).ser(&mut buf);
    buf.freeze()
}

pub fn control_datagram(control_type: ControlType, type_info: u32) -> Bytes {
    ControlPacket::new(control_type, type_info, 0, 0, Bytes::new()).to_bytes()
}

pub const PEER_SOCKET_ID: u32 = 0x1122_3344;
pub const PEER_ISN: u32 = 1000;

fn handshake_cif(version: u32, handshake_type: HandshakeType, cookie: u32, extensions: Bytes) -> HandshakeCif {
    HandshakeCif {
        version,
        encryption: 0,
        extension_field: if version == VERSION_4 { 2 } else { 0 },
        initial_seq: SeqNo::new(PEER_ISN),
        mtu: 1500,
        max_flow_window: 8192,
        handshake_type,
        socket_id: PEER_SOCKET_ID,
        cookie,
        peer_ip: [1, 0, 0, 127, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        extensions,
    }
}

pub fn induction_datagram(version: u32) -> Bytes {
    let cif = handshake_cif(version, HandshakeType::Induction, 0, Bytes::new());
    ControlPacket::handshake(0, 0, &cif).to_bytes()
}

/// a version 5 conclusion with an HSREQ extension and, optionally, a stream id
pub fn conclusion_datagram(cookie: u32, stream_id: Option<&str>) -> Bytes {
    let mut extensions = BytesMut::new();
    TsbpdExtension {
        srt_version: SRT_VERSION,
        srt_flags: 0xbf,
        receiver_delay: 200,
        sender_delay: 80,
    }.to_record(EXT_TYPE_HS_REQ).ser(&mut extensions);
    if let Some(stream_id) = stream_id {
        ExtensionRecord { ext_type: EXT_TYPE_STREAM_ID, content: encode_stream_id(stream_id) }
            .ser(&mut extensions);
    }

    let mut cif = handshake_cif(VERSION_5, HandshakeType::Conclusion, cookie, extensions.freeze());
    cif.extension_field = EXT_FLAG_HSREQ;
    ControlPacket::handshake(0, 0, &cif).to_bytes()
}

/// A [SendSocket] that records every packet instead of sending it
#[derive(Clone, Default)]
pub struct RecordingSocket {
    sent: Arc<Mutex<Vec<(SocketAddr, Bytes)>>>,
}

impl RecordingSocket {
    pub fn new() -> RecordingSocket {
        RecordingSocket::default()
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_control_packets(&self) -> Vec<ControlPacket> {
        self.sent().into_iter()
            .map(|(_, buf)| ControlPacket::deser(buf).unwrap())
            .collect()
    }

    pub fn sent_handshakes(&self) -> Vec<HandshakeCif> {
        self.sent_control_packets().into_iter()
            .filter(|p| p.control_type == ControlType::Handshake)
            .map(|p| HandshakeCif::deser(p.cif).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, control_type: ControlType) -> Vec<ControlPacket> {
        self.sent_control_packets().into_iter()
            .filter(|p| p.control_type == control_type)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SendSocket for RecordingSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.sent.lock().unwrap().push((to, Bytes::copy_from_slice(packet_buf)));
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
