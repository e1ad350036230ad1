use std::{
    io,
    net::SocketAddr,
    os::fd::AsRawFd,
    sync::Arc,
    task::{ready, Context, Poll},
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{Interest, ReadBuf},
    net::UdpSocket,
};
use tracing::{debug, info};

use crate::{
    ancillary::{self, AncillaryError, Datagram},
    TransportError,
};

/// A bound server socket, persistently polled for requests.
#[derive(Debug)]
pub struct Listener {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    wildcard: bool,
}

impl Listener {
    /// The shared socket, also used to answer requests in unconnected mode.
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Whether the listener is bound to the unspecified address, in which case the
    /// destination of each request comes from ancillary data.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Polls for the next request.
    pub fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<Result<Datagram, AncillaryError>>> {
        if !self.wildcard {
            let mut read_buf = ReadBuf::new(buf);
            let foreign = ready!(self.socket.poll_recv_from(cx, &mut read_buf))?;
            let datagram = Datagram { len: read_buf.filled().len(), foreign, local: self.local };
            return Poll::Ready(Ok(Ok(datagram)));
        }

        loop {
            ready!(self.socket.poll_recv_ready(cx))?;

            let fd = self.socket.as_raw_fd();
            match self
                .socket
                .try_io(Interest::READABLE, || ancillary::recv_with_destination(fd, &mut *buf))
            {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                result => return Poll::Ready(result),
            }
        }
    }
}

/// Binds one listener per address. Addresses that fail are skipped; it is an error
/// only if none could be bound.
///
/// With `reuse`, the listeners allow per-flow reply sockets to bind the same local
/// address and port.
pub fn bind_listeners(addrs: &[SocketAddr], reuse: bool) -> Result<Vec<Listener>, TransportError> {
    let mut listeners = Vec::with_capacity(addrs.len());
    let mut last_error = None;

    for &addr in addrs {
        match bind_one(addr, reuse) {
            Ok(listener) => {
                info!("bind address {}, service {}", listener.local.ip(), listener.local.port());
                listeners.push(listener);
            }
            Err((cause, source)) => {
                debug!(%addr, cause, ?source, "failed to bind listener");
                last_error = Some(TransportError::Socket { cause, addr, source });
            }
        }
    }

    if listeners.is_empty() {
        return Err(last_error.unwrap_or_else(|| TransportError::Socket {
            cause: "bind",
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no bind address"),
        }));
    }

    Ok(listeners)
}

fn bind_one(addr: SocketAddr, reuse: bool) -> Result<Listener, (&'static str, io::Error)> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ("socket", e))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true).map_err(|e| ("setsockopt v6only", e))?;
    }
    if reuse {
        socket.set_reuse_address(true).map_err(|e| ("setsockopt reuseaddr", e))?;
        socket.set_reuse_port(true).map_err(|e| ("setsockopt reuseport", e))?;
    }

    let wildcard = addr.ip().is_unspecified();
    if wildcard {
        ancillary::enable_destination_recovery(&socket, &addr)
            .map_err(|e| ("setsockopt origdstaddr", e))?;
    }

    socket.set_nonblocking(true).map_err(|e| ("fcntl nonblock", e))?;
    socket.bind(&addr.into()).map_err(|e| ("bind", e))?;

    let socket = UdpSocket::from_std(socket.into()).map_err(|e| ("register", e))?;
    let local = socket.local_addr().map_err(|e| ("getsockname", e))?;

    Ok(Listener { socket: Arc::new(socket), local, wildcard })
}
