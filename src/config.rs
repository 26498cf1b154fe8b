use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use rand::RngCore;
use crate::protocol::packet::HEADER_LEN;

#[derive(Debug, Clone)]
pub struct SrtConfig {
    pub listen_addr: SocketAddr,

    /// Datagrams bigger than this are dropped before they are decoded. This is the MTU a
    ///  caller may use.
    pub max_packet_size: usize,
    /// Size of the buffer the socket is read into. This must be bigger than
    ///  `max_packet_size`, otherwise oversized datagrams would be truncated silently instead
    ///  of being detected.
    pub receive_buffer_size: usize,

    /// maximum number of concurrently handled peers - datagrams from additional peers are
    ///  dropped
    pub max_peers: usize,

    pub window: WindowConfig,

    /// TSBPD delays offered in the conclusion response (the peer may ask for more)
    pub sender_latency: Duration,
    pub receiver_latency: Duration,

    /// keys the derivation of handshake cookies
    pub cookie_secret: Vec<u8>,

    /// reported in ACKs until the first RTT sample arrives
    pub default_rtt: Duration,
    pub default_rtt_variance: Duration,

    /// There is no congestion control, so these ACK fields are reported as constants
    pub reported_packet_rate: u32,
    pub reported_bandwidth: u32,
    pub reported_receive_rate: u32,
}

impl SrtConfig {
    pub fn new(listen_addr: SocketAddr) -> SrtConfig {
        let mut cookie_secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut cookie_secret);

        SrtConfig {
            listen_addr,
            max_packet_size: 1500,
            receive_buffer_size: 65536,
            max_peers: 10,
            window: WindowConfig::default(),
            sender_latency: Duration::from_millis(120),
            receiver_latency: Duration::from_millis(20),
            cookie_secret,
            default_rtt: Duration::from_millis(100),
            default_rtt_variance: Duration::from_millis(50),
            reported_packet_rate: 1000,
            reported_bandwidth: 1000,
            reported_receive_rate: 1000,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_size < HEADER_LEN {
            bail!("maximum packet size {} can not hold a packet header", self.max_packet_size);
        }
        if self.receive_buffer_size <= self.max_packet_size {
            bail!("receive buffer size {} must exceed the maximum packet size {}", self.receive_buffer_size, self.max_packet_size);
        }
        if self.max_peers == 0 {
            bail!("at least one peer must be allowed");
        }
        if self.cookie_secret.is_empty() {
            bail!("cookie secret must not be empty");
        }
        self.window.validate()
    }
}

#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// number of packet slots (received or missing) the window can track
    pub capacity: usize,
    /// interval at which the window checks for deliverable batches and expired gaps
    pub flush_interval: Duration,
    /// interval at which outstanding loss ranges are reported
    pub loss_report_interval: Duration,
    /// A missing packet is given up on after this time. NB: This trades latency for
    ///  completeness - the window stalls delivery for at most this long per gap
    pub loss_timeout: Duration,
    pub batch_channel_capacity: usize,
    pub loss_channel_capacity: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            capacity: 1024,
            flush_interval: Duration::from_millis(10),
            loss_report_interval: Duration::from_millis(120),
            loss_timeout: Duration::from_millis(150),
            batch_channel_capacity: 2048,
            loss_channel_capacity: 2048,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            bail!("receive window capacity must be positive");
        }
        if self.capacity > i32::MAX as usize {
            bail!("receive window capacity {} exceeds the sequence number space", self.capacity);
        }
        if self.flush_interval.is_zero() || self.loss_report_interval.is_zero() {
            bail!("window intervals must be positive");
        }
        if self.batch_channel_capacity == 0 || self.loss_channel_capacity == 0 {
            bail!("window channel capacities must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> SrtConfig {
        SrtConfig::new(SocketAddr::from(([127, 0, 0, 1], 9090)))
    }

    #[test]
    fn test_default_is_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn test_cookie_secret_is_random() {
        assert_ne!(config().cookie_secret, config().cookie_secret);
    }

    #[rstest]
    #[case::tiny_packets(|c: &mut SrtConfig| c.max_packet_size = 8)]
    #[case::buffer_too_small(|c: &mut SrtConfig| c.receive_buffer_size = 1500)]
    #[case::no_peers(|c: &mut SrtConfig| c.max_peers = 0)]
    #[case::no_secret(|c: &mut SrtConfig| c.cookie_secret.clear())]
    #[case::no_window(|c: &mut SrtConfig| c.window.capacity = 0)]
    #[case::no_flush(|c: &mut SrtConfig| c.window.flush_interval = Duration::ZERO)]
    fn test_invalid(#[case] modify: fn(&mut SrtConfig)) {
        let mut config = config();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
