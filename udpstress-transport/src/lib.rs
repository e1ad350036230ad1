use std::{io, net::SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

pub mod ancillary;
mod icmp;
mod limits;
mod listener;
mod resolve;

pub use icmp::IcmpSocket;
pub use limits::raise_nofile_limit;
pub use listener::{bind_listeners, Listener};
pub use resolve::{resolve_bind, resolve_target, Family};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("resolve host {host}, port {port}: {source}")]
    Resolve { host: String, port: u16, source: io::Error },
    #[error("no {family} address for host {host}, port {port}")]
    NoAddress { host: String, port: u16, family: Family },
    #[error("{cause}: address {addr}: {source}")]
    Socket { cause: &'static str, addr: SocketAddr, source: io::Error },
    #[error("getrlimit number of open files: {0}")]
    GetLimit(nix::Error),
    #[error("setrlimit number of open files to {limit}: {source}")]
    SetLimit { limit: u64, source: nix::Error },
    #[error("socket icmp: {0}")]
    Icmp(io::Error),
}

/// Creates the sockets of individual flows. Implementations must hand out
/// non-blocking sockets registered with the current Tokio runtime.
pub trait Transport: Unpin + 'static {
    /// Opens the socket of a client flow towards `foreign`. A `connected` socket is
    /// `connect()`ed to the peer, otherwise it is left for explicit addressing.
    fn open_flow(&self, foreign: SocketAddr, connected: bool) -> io::Result<UdpSocket>;

    /// Opens a reply socket that shares `local` with a listening socket and is
    /// connected to `foreign`.
    fn open_reply(&self, local: SocketAddr, foreign: SocketAddr) -> io::Result<UdpSocket>;
}

/// The plain UDP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct Udp;

impl Transport for Udp {
    fn open_flow(&self, foreign: SocketAddr, connected: bool) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(foreign), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        if connected {
            socket.connect(&foreign.into())?;
        }

        UdpSocket::from_std(socket.into())
    }

    fn open_reply(&self, local: SocketAddr, foreign: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
        if local.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&local.into())?;
        socket.connect(&foreign.into())?;

        UdpSocket::from_std(socket.into())
    }
}

/// Returns `true` for failures that only cost the current request: running out of
/// descriptors, or losing the race for a local address to another reply socket.
pub fn is_recoverable(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(nix::libc::EMFILE | nix::libc::ENFILE))
        || e.kind() == io::ErrorKind::AddrInUse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors() {
        assert!(is_recoverable(&io::Error::from_raw_os_error(nix::libc::EMFILE)));
        assert!(is_recoverable(&io::Error::from_raw_os_error(nix::libc::ENFILE)));
        assert!(is_recoverable(&io::Error::from_raw_os_error(nix::libc::EADDRINUSE)));
        assert!(!is_recoverable(&io::Error::from_raw_os_error(nix::libc::EACCES)));
        assert!(!is_recoverable(&io::Error::new(io::ErrorKind::Other, "other")));
    }

    #[tokio::test]
    async fn open_connected_flow() {
        let _ = tracing_subscriber::fmt::try_init();

        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let foreign = peer.local_addr().unwrap();

        let socket = Udp.open_flow(foreign, true).unwrap();
        assert_eq!(socket.peer_addr().unwrap(), foreign);

        socket.send(b"foo\n").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"foo\n");
        assert_eq!(from, socket.local_addr().unwrap());
    }

    #[tokio::test]
    async fn open_reply_shares_listener_address() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        listener.set_reuse_address(true).unwrap();
        listener.set_reuse_port(true).unwrap();
        listener.bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into()).unwrap();
        let local = listener.local_addr().unwrap().as_socket().unwrap();

        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let foreign = peer.local_addr().unwrap();

        let reply = Udp.open_reply(local, foreign).unwrap();
        assert_eq!(reply.local_addr().unwrap(), local);

        reply.send(b"bar\n").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"bar\n");
        assert_eq!(from, local);
    }
}
