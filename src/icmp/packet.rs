use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::icmp::checksum::{compute_checksum, compute_checksum_with_zeroed_field};
use crate::icmp::probe_outcome::ProbeOutcome;

/// size of the fixed part of an ICMP header: type, code, checksum, identifier, sequence
pub const ICMP_HEADER_LEN: usize = 8;
/// zero bytes sent after the header, echoed back by the target
pub const ECHO_PAYLOAD_LEN: usize = 8;
pub const ECHO_REQUEST_LEN: usize = ICMP_HEADER_LEN + ECHO_PAYLOAD_LEN;

const MIN_IPV4_HEADER_LEN: usize = 20;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    Echo = 8,
}

/// The identifier is what ties replies to this process: the process id truncated to 16 bits,
///  as traditional ping implementations do.
pub fn process_identifier() -> u16 {
    std::process::id() as u16
}

pub fn build_echo_request(sequence: u16, identifier: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(ECHO_REQUEST_LEN);
    buf.put_u8(IcmpType::Echo.into());
    buf.put_u8(0); // code
    buf.put_u16(0); // checksum, filled in below
    buf.put_u16(identifier);
    buf.put_u16(sequence);
    buf.put_bytes(0, ECHO_PAYLOAD_LEN);

    let checksum = compute_checksum(&buf);
    buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Classifies a datagram received on a raw ICMP socket, i.e. including the IPv4 header.
///
/// A raw socket sees all ICMP traffic arriving at the host, so a reply only counts if it comes
///  from `target`, and 'destination unreachable' only if it quotes our own echo request to
///  `target`.
pub fn validate_echo_reply(datagram: &[u8], target: Ipv4Addr, expected_identifier: u16) -> ProbeOutcome {
    let icmp = match strip_ip_header(datagram) {
        Some(icmp) => icmp,
        None => return ProbeOutcome::InvalidSize,
    };

    let stated_checksum = u16::from_be_bytes([icmp[2], icmp[3]]);
    if stated_checksum != compute_checksum_with_zeroed_field(icmp) {
        return ProbeOutcome::InvalidChecksum;
    }

    match IcmpType::try_from(icmp[0]) {
        Ok(IcmpType::EchoReply) | Ok(IcmpType::Echo) => {
            // 'Echo' is what we see when pinging ourselves over loopback
            if source_address(datagram) == target && identifier_of(icmp) == expected_identifier {
                ProbeOutcome::Success
            }
            else {
                ProbeOutcome::InvalidResponseId
            }
        }
        Ok(IcmpType::DestinationUnreachable) => {
            // the error is usually sent by a router, so its source tells us nothing
            match quoted_echo_request(&icmp[ICMP_HEADER_LEN..]) {
                Some((destination, identifier)) if destination == target && identifier == expected_identifier => ProbeOutcome::HostUnreachable,
                _ => ProbeOutcome::InvalidResponseId,
            }
        }
        Err(_) => ProbeOutcome::InvalidResponseType,
    }
}

/// Like [validate_echo_reply], additionally rejecting echo replies carrying a different sequence
///  number, e.g. a late reply to an earlier probe sent over the same socket.
pub fn validate_echo_reply_to(datagram: &[u8], target: Ipv4Addr, expected_identifier: u16, expected_sequence: u16) -> ProbeOutcome {
    let outcome = validate_echo_reply(datagram, target, expected_identifier);
    if outcome.is_success() && echo_sequence(datagram) != Some(expected_sequence) {
        return ProbeOutcome::InvalidResponseId;
    }
    outcome
}

fn echo_sequence(datagram: &[u8]) -> Option<u16> {
    let icmp = strip_ip_header(datagram)?;
    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}

/// Returns the ICMP part of an IPv4 datagram if it is big enough to hold an ICMP header. The
///  IP header length is variable (options), stated in 32 bit words.
fn strip_ip_header(datagram: &[u8]) -> Option<&[u8]> {
    let ip_header_len = (*datagram.first()? & 0x0f) as usize * 4;
    if ip_header_len < MIN_IPV4_HEADER_LEN || datagram.len() < ip_header_len + ICMP_HEADER_LEN {
        return None;
    }
    Some(&datagram[ip_header_len..])
}

/// only valid for datagrams that passed [strip_ip_header]
fn source_address(datagram: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15])
}

fn destination_address(datagram: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19])
}

fn identifier_of(icmp: &[u8]) -> u16 {
    u16::from_be_bytes([icmp[4], icmp[5]])
}

/// 'Destination unreachable' carries the IP header and the first 8 bytes of the datagram that
///  could not be delivered. If that was an echo request, returns its destination and identifier.
fn quoted_echo_request(quote: &[u8]) -> Option<(Ipv4Addr, u16)> {
    let quoted_icmp = strip_ip_header(quote)?;
    if quoted_icmp[0] != u8::from(IcmpType::Echo) {
        return None;
    }
    Some((destination_address(quote), identifier_of(quoted_icmp)))
}
