use std::fmt::{Debug, Formatter};
use std::io;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

/// A raw IPv4 ICMP socket registered with the tokio reactor. Opening it requires root or
///  CAP_NET_RAW.
///
/// Received datagrams include the IP header. All ICMP traffic arriving at the host is visible
///  on a raw socket, so callers must filter for replies to their own requests.
///
/// The socket is closed when this is dropped, which includes a probe future being cancelled.
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
}
impl Debug for IcmpSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "IcmpSocket{{fd:{}}}", self.inner.get_ref().as_raw_fd())
    }
}

impl IcmpSocket {
    pub fn open() -> io::Result<IcmpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        Ok(IcmpSocket {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub async fn send_to(&self, packet: &[u8], to: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(to, 0));
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|s| s.get_ref().send_to(packet, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|s| Read::read(&mut s.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
