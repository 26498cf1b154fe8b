use clap::Parser;
use clap_derive::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use srt_ingest::config::SrtConfig;
use srt_ingest::protocol::packet::DataPacket;
use srt_ingest::receive_window::LossRange;
use srt_ingest::server::batch_dispatcher::BatchDispatcher;
use srt_ingest::server::selector::Selector;
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:9000")]
    listen_address: String,

    #[clap(long, default_value_t = 10)]
    max_peers: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

/// logs what arrives instead of passing it on
struct LoggingDispatcher;

#[async_trait]
impl BatchDispatcher for LoggingDispatcher {
    async fn on_connect(&self, peer: SocketAddr, stream_id: Option<String>) {
        info!("{:?} connected with stream id {:?}", peer, stream_id);
    }

    async fn on_batch(&self, peer: SocketAddr, packets: Vec<DataPacket>) {
        let num_bytes = packets.iter().map(|p| p.payload.len()).sum::<usize>();
        match (packets.first(), packets.last()) {
            (Some(first), Some(last)) => info!("{:?}: packets #{} to #{}, {} bytes", peer, first.seq, last.seq, num_bytes),
            _ => info!("{:?}: empty batch", peer),
        }
    }

    async fn on_loss(&self, peer: SocketAddr, ranges: Vec<LossRange>) {
        for range in ranges {
            warn!("{:?}: missing #{} to #{}", peer, range.start, range.end);
        }
    }

    async fn on_close(&self, peer: SocketAddr) {
        info!("{:?} disconnected", peer);
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = SrtConfig::new(args.listen_address.parse()?);
    config.max_peers = args.max_peers;

    let mut selector = Selector::bind(config, Arc::new(LoggingDispatcher)).await?;
    info!("receiving on {:?} - press Ctrl-C to stop", selector.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    selector.shutdown().await;
    Ok(())
}
