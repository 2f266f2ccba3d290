use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use clap_derive::Parser;
use qnet_tiebreaker::icmp::icmp_socket::IcmpSocket;
use qnet_tiebreaker::icmp::probe::IcmpProber;
use qnet_tiebreaker::tiebreaker::daemon::run_tiebreaker;
use qnet_tiebreaker::tiebreaker::liveness_monitor::LivenessMonitor;
use qnet_tiebreaker::tiebreaker::quorum_device::LoggingQuorumDevice;
use qnet_tiebreaker::tiebreaker::tiebreaker_config::TiebreakerConfig;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Level};

/// IP based quorum tiebreaker
#[derive(Parser)]
struct Args {
    /// host name or IPv4 address to ping, typically the default gateway
    #[clap(short = 'a', long)]
    address: String,

    /// token timeout (milliseconds)
    #[clap(short, long, default_value_t = 10_000)]
    token: u64,

    /// starting ping interval hint (milliseconds)
    #[clap(short, long, default_value_t = 1_000)]
    interval: u64,

    /// make one node + IP tiebreaker sufficient to form a quorum (DANGEROUS)
    #[clap(short, long, default_value_t = false)]
    soft_quorum: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn tiebreaker_config(&self) -> TiebreakerConfig {
        TiebreakerConfig {
            token_timeout: Duration::from_millis(self.token),
            ping_interval: Duration::from_millis(self.interval),
            allow_soft_quorum: self.soft_quorum,
            ..TiebreakerConfig::new(self.address.clone())
        }
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

    let config = args.tiebreaker_config();
    config.validate()?;

    // fail fast rather than voting 'dead' forever
    if let Err(e) = IcmpSocket::open() {
        error!("cannot open a raw ICMP socket - qnetd needs root or CAP_NET_RAW: {}", e);
        return Err(anyhow!("no raw socket access"));
    }

    let prober = IcmpProber::new(config.probe_options());
    let monitor = Arc::new(LivenessMonitor::new(Arc::new(prober)));
    let device = Arc::new(LoggingQuorumDevice::new());

    let mut sigterm = signal(SignalKind::terminate())
        .context("installing SIGTERM handler failed")?;
    let shutdown = async move {
        select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    };

    run_tiebreaker(config, device, monitor, shutdown).await?;
    info!("qnetd stopped");
    Ok(())
}
