use std::fmt::Debug;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::{debug, trace};

use crate::icmp::icmp_socket::IcmpSocket;
use crate::icmp::packet::{build_echo_request, process_identifier, validate_echo_reply_to};
use crate::icmp::probe_outcome::{ProbeOutcome, TransportError};
use crate::icmp::resolver::{resolve_target, ResolveError};

/// Big enough for an IP header with options plus an ICMP error quoting our request
const RECV_BUFFER_SIZE: usize = 512;

/// What to do with a received datagram that is not an answer to the probe: a reply to some
///  other process' ping, a late reply to an earlier probe, a corrupted packet, or unrelated
///  ICMP traffic. 'Destination unreachable' for our own request is always reported.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MalformedReplyPolicy {
    /// keep waiting for the real reply (until the timeout if there is one)
    SkipAndContinue,
    /// report the first such datagram as the probe's outcome
    SurfaceImmediately,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// upper bound for waiting for a reply; `None` waits indefinitely, which is only useful for
    ///  interactive use
    pub timeout: Option<Duration>,
    pub malformed_reply: MalformedReplyPolicy,
    pub identifier: u16,
}
impl ProbeOptions {
    /// A timeout of zero seconds means 'wait forever'
    pub fn with_timeout_secs(timeout_secs: u64) -> ProbeOptions {
        ProbeOptions {
            timeout: if timeout_secs == 0 { None } else { Some(Duration::from_secs(timeout_secs)) },
            malformed_reply: MalformedReplyPolicy::SkipAndContinue,
            identifier: process_identifier(),
        }
    }
}

/// Checks reachability of a target once. This is the seam between the liveness monitor and the
///  network: the monitor depends only on this trait.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prober: Debug + Send + Sync + 'static {
    async fn probe(&self, target: &str, sequence: u16) -> ProbeOutcome;
}

/// [Prober] sending ICMP echo requests, with a fresh raw socket for every probe
#[derive(Debug, Clone)]
pub struct IcmpProber {
    options: ProbeOptions,
}
impl IcmpProber {
    pub fn new(options: ProbeOptions) -> IcmpProber {
        IcmpProber { options }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: &str, sequence: u16) -> ProbeOutcome {
        probe_host(target, sequence, &self.options).await
    }
}

/// Resolves `target` and pings it once over a socket that is opened for this probe and closed
///  afterwards.
pub async fn probe_host(target: &str, sequence: u16, options: &ProbeOptions) -> ProbeOutcome {
    match resolve_target(target).await {
        Ok(addr) => probe_addr(addr, sequence, options).await,
        Err(e) => resolution_failure(e),
    }
}

pub async fn probe_addr(addr: Ipv4Addr, sequence: u16, options: &ProbeOptions) -> ProbeOutcome {
    let mut socket = match IcmpSocket::open() {
        Ok(socket) => socket,
        Err(e) => return ProbeOutcome::transport("socket", e),
    };
    probe_addr_with_socket(&mut socket, addr, sequence, options).await
}

/// Pings over a socket owned by the caller, e.g. one opened before dropping privileges. The
///  `&mut` ensures that no two probes share a socket concurrently.
pub async fn probe_host_with_socket(socket: &mut IcmpSocket, target: &str, sequence: u16, options: &ProbeOptions) -> ProbeOutcome {
    match resolve_target(target).await {
        Ok(addr) => probe_addr_with_socket(socket, addr, sequence, options).await,
        Err(e) => resolution_failure(e),
    }
}

pub async fn probe_addr_with_socket(socket: &mut IcmpSocket, addr: Ipv4Addr, sequence: u16, options: &ProbeOptions) -> ProbeOutcome {
    let packet = build_echo_request(sequence, options.identifier);
    if let Err(e) = send_fully(socket, &packet, addr).await {
        return ProbeOutcome::transport("sendto", e);
    }

    let reply = await_reply(socket, addr, sequence, options);
    match options.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, reply).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::Timeout,
        },
        None => reply.await,
    }
}

async fn send_fully(socket: &IcmpSocket, packet: &[u8], to: Ipv4Addr) -> io::Result<()> {
    loop {
        let sent = socket.send_to(packet, to).await?;
        if sent >= packet.len() {
            return Ok(());
        }
        debug!("short write to {} ({} of {} bytes) - sending again", to, sent, packet.len());
    }
}

async fn await_reply(socket: &IcmpSocket, target: Ipv4Addr, sequence: u16, options: &ProbeOptions) -> ProbeOutcome {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => return ProbeOutcome::transport("recvfrom", e),
        };

        let outcome = validate_echo_reply_to(&buf[..len], target, options.identifier, sequence);
        if let Some(outcome) = apply_malformed_reply_policy(outcome, options.malformed_reply) {
            return outcome;
        }
    }
}

/// `None` means 'not an answer, keep waiting'
fn apply_malformed_reply_policy(outcome: ProbeOutcome, policy: MalformedReplyPolicy) -> Option<ProbeOutcome> {
    match outcome {
        ProbeOutcome::Success | ProbeOutcome::HostUnreachable => Some(outcome),
        _ => match policy {
            MalformedReplyPolicy::SurfaceImmediately => Some(outcome),
            MalformedReplyPolicy::SkipAndContinue => {
                trace!("discarding received datagram: {}", outcome);
                None
            }
        }
    }
}

fn resolution_failure(error: ResolveError) -> ProbeOutcome {
    match error {
        ResolveError::HostNotFound(host) => {
            debug!("host {} not found", host);
            ProbeOutcome::HostNotFound
        }
        ResolveError::Io { source, .. } => ProbeOutcome::transport("getaddrinfo", source),
        e @ ResolveError::Resolver { .. } => ProbeOutcome::TransportError(TransportError {
            operation: "getaddrinfo",
            kind: io::ErrorKind::Other,
            raw_os_error: None,
            message: e.to_string(),
        }),
    }
}
