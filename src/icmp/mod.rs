//! ICMP echo ('ping') over raw IPv4 sockets: packet codec, name resolution, and the probe
//!  engine sending one echo request and classifying what comes back.

pub mod checksum;
pub mod icmp_socket;
pub mod packet;
pub mod probe;
pub mod probe_outcome;
pub mod resolver;
