use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use sha2::{Digest, Sha256};

/// Derives handshake cookies: a keyed hash of the peer's address and the current minute, so a
///  peer can only echo back a cookie it actually received from us recently.
#[derive(Clone)]
pub struct CookieGenerator {
    secret: Vec<u8>,
}

impl CookieGenerator {
    pub fn new(secret: Vec<u8>) -> CookieGenerator {
        CookieGenerator { secret }
    }

    pub fn cookie(&self, peer: SocketAddr, now: SystemTime) -> u32 {
        let minute_bucket = now.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() / 60)
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        match peer.ip() {
            std::net::IpAddr::V4(ip) => hasher.update(ip.octets()),
            std::net::IpAddr::V6(ip) => hasher.update(ip.octets()),
        }
        hasher.update(peer.port().to_be_bytes());
        hasher.update(minute_bucket.to_be_bytes());
        let digest = hasher.finalize();

        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}
