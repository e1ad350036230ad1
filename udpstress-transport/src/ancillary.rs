//! Recovery of the local destination address of datagrams received on a
//! wildcard-bound socket.
//!
//! A socket bound to `0.0.0.0` or `::` does not tell which of the host's addresses a
//! datagram was sent to. With the original-destination socket options enabled the
//! kernel attaches that address, including the port, as control data to every
//! datagram. Only Linux provides these options.

use std::{io, net::SocketAddr, os::fd::RawFd};

use socket2::Socket;
use thiserror::Error;

/// A datagram received together with both ends of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    /// Payload bytes written into the receive buffer.
    pub len: usize,
    /// The sender.
    pub foreign: SocketAddr,
    /// The address the sender targeted.
    pub local: SocketAddr,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AncillaryError {
    /// The control buffer was too small; the destination cannot be trusted.
    #[error("control data truncated")]
    Truncated,
    /// The socket was not set up with [`enable_destination_recovery`].
    #[error("no destination address in control data")]
    Missing,
    #[error("datagram without source address")]
    NoSource,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use std::{
        io::{self, IoSliceMut},
        net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
        os::fd::RawFd,
    };

    use nix::{
        libc,
        sys::socket::{
            recvmsg, setsockopt, sockopt, ControlMessageOwned, MsgFlags, SockaddrStorage,
        },
    };
    use socket2::Socket;

    use super::{AncillaryError, Datagram};

    pub(super) fn enable(socket: &Socket, addr: &SocketAddr) -> io::Result<()> {
        match addr {
            SocketAddr::V4(_) => setsockopt(socket, sockopt::Ipv4OrigDstAddr, &true)?,
            SocketAddr::V6(_) => setsockopt(socket, sockopt::Ipv6OrigDstAddr, &true)?,
        }

        Ok(())
    }

    pub(super) fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<Result<Datagram, AncillaryError>> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buffer = nix::cmsg_space!(libc::sockaddr_in6);

        let msg = recvmsg::<SockaddrStorage>(fd, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())?;
        if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
            return Ok(Err(AncillaryError::Truncated));
        }

        let Some(foreign) = msg.address.as_ref().and_then(from_storage) else {
            return Ok(Err(AncillaryError::NoSource));
        };

        let local = msg.cmsgs().find_map(|cmsg| match cmsg {
            ControlMessageOwned::Ipv4OrigDstAddr(sin) => Some(from_sockaddr_in(&sin)),
            ControlMessageOwned::Ipv6OrigDstAddr(sin6) => Some(from_sockaddr_in6(&sin6)),
            _ => None,
        });

        Ok(match local {
            Some(local) => Ok(Datagram { len: msg.bytes, foreign, local }),
            None => Err(AncillaryError::Missing),
        })
    }

    fn from_storage(storage: &SockaddrStorage) -> Option<SocketAddr> {
        if let Some(sin) = storage.as_sockaddr_in() {
            return Some(SocketAddr::V4((*sin).into()));
        }
        storage.as_sockaddr_in6().map(|sin6| SocketAddr::V6((*sin6).into()))
    }

    fn from_sockaddr_in(sin: &libc::sockaddr_in) -> SocketAddr {
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port)))
    }

    fn from_sockaddr_in6(sin6: &libc::sockaddr_in6) -> SocketAddr {
        let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
        SocketAddr::V6(SocketAddrV6::new(
            ip,
            u16::from_be(sin6.sin6_port),
            sin6.sin6_flowinfo,
            sin6.sin6_scope_id,
        ))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use std::{io, net::SocketAddr, os::fd::RawFd};

    use socket2::Socket;

    use super::{AncillaryError, Datagram};

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "destination address recovery is not available on this platform",
        )
    }

    pub(super) fn enable(_socket: &Socket, _addr: &SocketAddr) -> io::Result<()> {
        Err(unsupported())
    }

    pub(super) fn recv(_fd: RawFd, _buf: &mut [u8]) -> io::Result<Result<Datagram, AncillaryError>> {
        Err(unsupported())
    }
}

/// Asks the kernel to attach the original destination address to every datagram
/// received on `socket`. `addr` is the address the socket is bound to.
pub fn enable_destination_recovery(socket: &Socket, addr: &SocketAddr) -> io::Result<()> {
    imp::enable(socket, addr)
}

/// Receives one datagram from the non-blocking socket `fd` together with its
/// original destination.
///
/// The outer error is the receive itself (including `WouldBlock`); the inner error
/// means the datagram arrived but its destination could not be recovered.
pub fn recv_with_destination(
    fd: RawFd,
    buf: &mut [u8],
) -> io::Result<Result<Datagram, AncillaryError>> {
    imp::recv(fd, buf)
}
