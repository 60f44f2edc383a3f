use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use lrcp::config::LrcpConfig;
use lrcp::line_reversal::LineReversal;
use lrcp::transport::udp::UdpServer;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:50000")]
    address: String,

    /// retransmission interval in milliseconds
    #[clap(long)]
    retransmission_millis: Option<u64>,

    /// session lifetime in seconds
    #[clap(long)]
    session_lifetime_secs: Option<u64>,

    /// send all unacknowledged data at once instead of a limited number of chunks
    #[clap(long, default_value_t = false)]
    no_chunk_cap: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
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

    let self_addr: SocketAddr = args.address.parse()?;
    let mut config = LrcpConfig::new(self_addr);
    if let Some(millis) = args.retransmission_millis {
        config.retransmission_interval = Duration::from_millis(millis);
    }
    if let Some(secs) = args.session_lifetime_secs {
        config.session_lifetime = Duration::from_secs(secs);
    }
    if args.no_chunk_cap {
        config.max_chunks_per_flush = None;
    }

    let server = UdpServer::bind(config).await?;
    info!("line reversal server listening on {:?}", server.local_addr()?);

    server.run(Arc::new(LineReversal)).await;
    Ok(())
}
