//! The handshake control packet's CIF:
//!
//! ```ascii
//!  0: version (u32) - 4 or 5
//!  4: encryption field (u16)
//!  6: extension field (u16) - HSv5 magic in induction responses, extension flags otherwise
//!  8: initial packet sequence number (u32)
//! 12: maximum transmission unit (u32)
//! 16: maximum flow window size (u32)
//! 20: handshake type (u32)
//! 24: socket id of the sender (u32)
//! 28: SYN cookie (u32)
//! 32: peer IP address (16 bytes)
//! 48: extensions, repeated:
//!     type (u16) | length in 4-byte units (u16) | content (length * 4 bytes)
//! ```

use std::net::IpAddr;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::trace;
use crate::error::SrtError;
use crate::protocol::seq_no::SeqNo;
use crate::util::buf_ext::WireBuf;

pub const CIF_FIXED_LEN: usize = 48;

pub const VERSION_4: u32 = 4;
pub const VERSION_5: u32 = 5;
pub const HS_V5_MAGIC: u16 = 0x4A17;

pub const EXT_FLAG_HSREQ: u16 = 0x0001;
pub const EXT_FLAG_KMREQ: u16 = 0x0002;
pub const EXT_FLAG_CONFIG: u16 = 0x0004;

pub const EXT_TYPE_HS_REQ: u16 = 1;
pub const EXT_TYPE_HS_RSP: u16 = 2;
pub const EXT_TYPE_KM_REQ: u16 = 3;
pub const EXT_TYPE_KM_RSP: u16 = 4;
pub const EXT_TYPE_STREAM_ID: u16 = 5;
pub const EXT_TYPE_CONGESTION: u16 = 6;
pub const EXT_TYPE_FILTER: u16 = 7;
pub const EXT_TYPE_GROUP: u16 = 8;

/// SRT library version advertised in HSRSP extensions (1.5.0)
pub const SRT_VERSION: u32 = 0x0001_0500;

#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum HandshakeType {
    WaveHand = 0x0000_0000,
    Induction = 0x0000_0001,
    Done = 0xFFFF_FFFD,
    Agreement = 0xFFFF_FFFE,
    Conclusion = 0xFFFF_FFFF,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeCif {
    pub version: u32,
    pub encryption: u16,
    pub extension_field: u16,
    pub initial_seq: SeqNo,
    pub mtu: u32,
    pub max_flow_window: u32,
    pub handshake_type: HandshakeType,
    pub socket_id: u32,
    pub cookie: u32,
    pub peer_ip: [u8; 16],
    /// raw extension block, empty if the CIF has no extensions
    pub extensions: Bytes,
}

impl HandshakeCif {
    pub fn deser(mut buf: Bytes) -> Result<HandshakeCif, SrtError> {
        buf.ensure_remaining(CIF_FIXED_LEN, "handshake CIF")?;

        let version = buf.read_u32("handshake version")?;
        let encryption = buf.read_u16("handshake encryption")?;
        let extension_field = buf.read_u16("handshake extension field")?;
        let initial_seq = SeqNo::new(buf.read_u32("handshake initial sequence number")?);
        let mtu = buf.read_u32("handshake MTU")?;
        let max_flow_window = buf.read_u32("handshake flow window")?;
        let raw_type = buf.read_u32("handshake type")?;
        let handshake_type = HandshakeType::try_from(raw_type)
            .map_err(|_| SrtError::Malformed(format!("unsupported handshake type {:#010x}", raw_type)))?;
        let socket_id = buf.read_u32("handshake socket id")?;
        let cookie = buf.read_u32("handshake cookie")?;
        let peer_ip = buf.read_array::<16>("handshake peer ip")?;

        Ok(HandshakeCif {
            version,
            encryption,
            extension_field,
            initial_seq,
            mtu,
            max_flow_window,
            handshake_type,
            socket_id,
            cookie,
            peer_ip,
            extensions: buf,
        })
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u16(self.encryption);
        buf.put_u16(self.extension_field);
        buf.put_u32(self.initial_seq.to_raw());
        buf.put_u32(self.mtu);
        buf.put_u32(self.max_flow_window);
        buf.put_u32(self.handshake_type.into());
        buf.put_u32(self.socket_id);
        buf.put_u32(self.cookie);
        buf.put_slice(&self.peer_ip);
        buf.put_slice(&self.extensions);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CIF_FIXED_LEN + self.extensions.len());
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn parse_extensions(&self) -> Result<Vec<HandshakeExtension>, SrtError> {
        parse_extensions(self.extensions.clone())?
            .into_iter()
            .map(HandshakeExtension::from_record)
            .collect()
    }
}

/// a single raw `type | length | content` extension record
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionRecord {
    pub ext_type: u16,
    pub content: Bytes,
}

impl ExtensionRecord {
    pub fn ser(&self, buf: &mut BytesMut) {
        debug_assert!(self.content.len() % 4 == 0, "extension content must be padded to 4-byte units");
        buf.put_u16(self.ext_type);
        buf.put_u16((self.content.len() / 4) as u16);
        buf.put_slice(&self.content);
    }
}

/// Walks the extension block record by record until it is exhausted. A record header that
///  is cut off or a declared length exceeding the remaining bytes is a format error - parsing
///  never reads past the end of the block.
pub fn parse_extensions(mut buf: Bytes) -> Result<Vec<ExtensionRecord>, SrtError> {
    let mut result = Vec::new();
    while !buf.is_empty() {
        let ext_type = buf.read_u16("extension type")?;
        let len_units = buf.read_u16("extension length")?;
        let content = buf.read_bytes(len_units as usize * 4, "extension content")?;
        trace!("handshake extension type {} with {} bytes", ext_type, content.len());
        result.push(ExtensionRecord { ext_type, content });
    }
    Ok(result)
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandshakeExtension {
    /// HSREQ / HSRSP, both carrying TSBPD parameters
    Tsbpd(TsbpdExtension),
    StreamId(String),
    /// anything else (key material, congestion, filter, group) is kept but not interpreted
    Other(ExtensionRecord),
}

impl HandshakeExtension {
    fn from_record(record: ExtensionRecord) -> Result<HandshakeExtension, SrtError> {
        match record.ext_type {
            EXT_TYPE_HS_REQ | EXT_TYPE_HS_RSP => Ok(HandshakeExtension::Tsbpd(TsbpdExtension::deser(record.content)?)),
            EXT_TYPE_STREAM_ID => Ok(HandshakeExtension::StreamId(decode_stream_id(&record.content)?)),
            _ => Ok(HandshakeExtension::Other(record)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TsbpdExtension {
    pub srt_version: u32,
    pub srt_flags: u32,
    /// millis
    pub receiver_delay: u16,
    /// millis
    pub sender_delay: u16,
}

impl TsbpdExtension {
    pub const SERIALIZED_LEN: usize = 12;

    pub fn deser(mut buf: Bytes) -> Result<TsbpdExtension, SrtError> {
        let srt_version = buf.read_u32("TSBPD version")?;
        let srt_flags = buf.read_u32("TSBPD flags")?;
        let receiver_delay = buf.read_u16("TSBPD receiver delay")?;
        let sender_delay = buf.read_u16("TSBPD sender delay")?;
        Ok(TsbpdExtension {
            srt_version,
            srt_flags,
            receiver_delay,
            sender_delay,
        })
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.srt_version);
        buf.put_u32(self.srt_flags);
        buf.put_u16(self.receiver_delay);
        buf.put_u16(self.sender_delay);
    }

    pub fn to_record(&self, ext_type: u16) -> ExtensionRecord {
        let mut buf = BytesMut::with_capacity(Self::SERIALIZED_LEN);
        self.ser(&mut buf);
        ExtensionRecord { ext_type, content: buf.freeze() }
    }
}

/// The stream id travels as zero-padded 32-bit words with the bytes of each word reversed.
pub fn decode_stream_id(content: &[u8]) -> Result<String, SrtError> {
    let mut raw = Vec::with_capacity(content.len());
    for word in content.chunks(4) {
        raw.extend(word.iter().rev());
    }
    while raw.last() == Some(&0) {
        raw.pop();
    }
    String::from_utf8(raw)
        .map_err(|_| SrtError::Malformed("stream id is not valid UTF-8".to_string()))
}

pub fn encode_stream_id(stream_id: &str) -> Bytes {
    let mut padded = stream_id.as_bytes().to_vec();
    padded.resize(stream_id.len().div_ceil(4) * 4, 0);

    let mut buf = BytesMut::with_capacity(padded.len());
    for word in padded.chunks(4) {
        buf.extend(word.iter().rev());
    }
    buf.freeze()
}

/// The peer address field holds IPv4 addresses in its first word, byte order reversed, and
///  IPv6 addresses as four words with reversed byte order each.
pub fn encode_peer_ip(ip: IpAddr) -> [u8; 16] {
    let mut result = [0u8; 16];
    match ip {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets.reverse();
            result[..4].copy_from_slice(&octets);
        }
        IpAddr::V6(v6) => {
            for (dst, src) in result.chunks_mut(4).zip(v6.octets().chunks(4)) {
                dst.copy_from_slice(src);
                dst.reverse();
            }
        }
    }
    result
}
