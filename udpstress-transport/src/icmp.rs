use std::{
    io::{self, Read},
    net::{Ipv4Addr, SocketAddr},
    task::{ready, Context, Poll},
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::TransportError;

/// Raw IPv4 ICMP socket. Sends fabricated errors and counts what comes back.
/// Opening it needs privileges, so it is created before they are dropped.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
}

impl IcmpSocket {
    pub fn open() -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(TransportError::Icmp)?;
        socket.set_nonblocking(true).map_err(TransportError::Icmp)?;

        Ok(Self { inner: AsyncFd::new(socket).map_err(TransportError::Icmp)? })
    }

    /// Sends an ICMP message to `dst`. The kernel prepends the IP header.
    pub fn send_to(&self, packet: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        self.inner.get_ref().send_to(packet, &SocketAddr::from((dst, 0)).into())
    }

    /// Polls for the next incoming ICMP packet. The packet includes its IP header.
    pub fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;

            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}
