use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use qnet_tiebreaker::icmp::icmp_socket::IcmpSocket;
use qnet_tiebreaker::icmp::probe::{probe_host_with_socket, MalformedReplyPolicy, ProbeOptions};
use qnet_tiebreaker::icmp::probe_outcome::ProbeOutcome;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, Instant};
use tracing::Level;

/// Pings a host once per second until interrupted
#[derive(Parser)]
struct Args {
    host: String,

    /// seconds to wait for each reply; 0 waits forever
    #[clap(default_value_t = 2)]
    timeout: u64,

    /// report unrelated or corrupted replies instead of waiting for the real one
    #[clap(long, default_value_t = false)]
    surface_malformed: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn probe_options(&self) -> ProbeOptions {
        let mut options = ProbeOptions::with_timeout_secs(self.timeout);
        if self.surface_malformed {
            options.malformed_reply = MalformedReplyPolicy::SurfaceImmediately;
        }
        options
    }
}

/// What to print for a probe's outcome, and whether to keep pinging
fn describe(host: &str, outcome: &ProbeOutcome, received: usize, rtt: Duration) -> (String, bool) {
    match outcome {
        ProbeOutcome::Success => (format!("Reply #{} RTT = {}.{:06} seconds", received, rtt.as_secs(), rtt.subsec_micros()), true),
        ProbeOutcome::Timeout => (format!("{} timed out", host), true),
        ProbeOutcome::HostUnreachable => (format!("{} is unreachable", host), true),
        ProbeOutcome::HostNotFound => (format!("Host {} not found!", host), false),
        ProbeOutcome::TransportError(e) => (format!("icmp_ping_host: {}", e), false),
        other => (format!("{}.", other), true),
    }
}

#[derive(Debug, Default)]
struct PingStats {
    sent: usize,
    received: usize,
}

/// Returns only if pinging cannot continue
async fn ping_until_interrupted(host: &str, options: &ProbeOptions, mut socket: IcmpSocket, stats: &mut PingStats) {
    loop {
        let begin = Instant::now();
        let sequence = (stats.sent as u16).wrapping_add(1);
        let outcome = probe_host_with_socket(&mut socket, host, sequence, options).await;
        stats.sent += 1;
        if outcome.is_success() {
            stats.received += 1;
        }

        let (message, keep_going) = describe(host, &outcome, stats.received, begin.elapsed());
        println!("{}", message);
        if !keep_going {
            return;
        }

        sleep(Duration::from_secs(1)).await;
    }
}

/// Completes on Ctrl-C or SIGTERM. The SIGTERM handler is installed right away, so a signal
///  arriving before the future is polled is not lost.
fn interrupted() -> io::Result<impl Future<Output=()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(async move {
        select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    })
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .try_init()
        .ok();

    let socket = match IcmpSocket::open() {
        Ok(socket) => socket,
        Err(e) => {
            eprintln!("cannot open raw ICMP socket (needs root or CAP_NET_RAW): {}", e);
            return ExitCode::FAILURE;
        }
    };

    let interrupted = match interrupted() {
        Ok(interrupted) => interrupted,
        Err(e) => {
            eprintln!("cannot install signal handler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Pinging {}", args.host);
    let options = args.probe_options();

    let mut stats = PingStats::default();
    select! {
        _ = ping_until_interrupted(&args.host, &options, socket, &mut stats) => {
            return ExitCode::FAILURE;
        }
        _ = interrupted => {}
    }

    println!("{} sent; {} received", stats.sent, stats.received);
    if stats.sent > stats.received {
        ExitCode::FAILURE
    }
    else {
        ExitCode::SUCCESS
    }
}


#[cfg(test)]
mod tests {
    use std::io;
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::success(ProbeOutcome::Success, "Reply #3 RTT = 0.012345 seconds", true)]
    #[case::timeout(ProbeOutcome::Timeout, "gw timed out", true)]
    #[case::unreachable(ProbeOutcome::HostUnreachable, "gw is unreachable", true)]
    #[case::not_found(ProbeOutcome::HostNotFound, "Host gw not found!", false)]
    #[case::checksum(ProbeOutcome::InvalidChecksum, "Invalid checksum.", true)]
    #[case::size(ProbeOutcome::InvalidSize, "Invalid size of reply packet.", true)]
    fn test_describe(#[case] outcome: ProbeOutcome, #[case] expected: &str, #[case] expected_keep_going: bool) {
        let (message, keep_going) = describe("gw", &outcome, 3, Duration::from_micros(12_345));
        assert_eq!(message, expected);
        assert_eq!(keep_going, expected_keep_going);
    }

    #[test]
    fn test_transport_error_stops() {
        let outcome = ProbeOutcome::transport("sendto", io::Error::from(io::ErrorKind::PermissionDenied));
        let (_, keep_going) = describe("gw", &outcome, 0, Duration::ZERO);
        assert!(!keep_going);
    }

    #[rstest]
    #[case(&["icmp-ping", "gw"], Some(Duration::from_secs(2)), MalformedReplyPolicy::SkipAndContinue)]
    #[case(&["icmp-ping", "gw", "5"], Some(Duration::from_secs(5)), MalformedReplyPolicy::SkipAndContinue)]
    #[case(&["icmp-ping", "gw", "0", "--surface-malformed"], None, MalformedReplyPolicy::SurfaceImmediately)]
    fn test_args(#[case] argv: &[&str], #[case] timeout: Option<Duration>, #[case] policy: MalformedReplyPolicy) {
        let options = Args::parse_from(argv.iter().copied()).probe_options();
        assert_eq!(options.timeout, timeout);
        assert_eq!(options.malformed_reply, policy);
    }

    #[tokio::test]
    async fn test_sigterm_interrupts() {
        let interrupted = interrupted().unwrap();
        // SAFETY: the handler is installed, so this does not terminate the test process
        unsafe { libc::raise(libc::SIGTERM); }
        assert!(tokio::time::timeout(Duration::from_secs(5), interrupted).await.is_ok());
    }
}
