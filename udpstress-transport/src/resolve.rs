use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::lookup_host;
use tracing::{debug, info};

use crate::TransportError;

/// Address family restriction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    #[default]
    Any,
    V4,
    V6,
}

impl Family {
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

/// Resolves the client target and returns the first candidate that accepts a UDP
/// `socket()` and `connect()`. The trial socket is closed again.
pub async fn resolve_target(
    host: &str,
    port: u16,
    family: Family,
) -> Result<SocketAddr, TransportError> {
    let candidates = lookup_host((host, port)).await.map_err(|source| {
        TransportError::Resolve { host: host.to_owned(), port, source }
    })?;

    let mut last_error = None;
    for addr in candidates.filter(|addr| family.matches(addr)) {
        match try_connect(addr) {
            Ok(()) => {
                info!("connect address {}, service {}", addr.ip(), addr.port());
                return Ok(addr);
            }
            Err((cause, source)) => {
                debug!(%addr, cause, ?source, "candidate address rejected");
                last_error = Some(TransportError::Socket { cause, addr, source });
            }
        }
    }

    Err(last_error.unwrap_or(TransportError::NoAddress { host: host.to_owned(), port, family }))
}

fn try_connect(addr: SocketAddr) -> Result<(), (&'static str, io::Error)> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ("socket", e))?;
    socket.connect(&addr.into()).map_err(|e| ("connect", e))?;

    Ok(())
}

/// Resolves the server bind addresses. Without a host, the wildcard addresses of
/// every permitted family are returned. At most `limit` addresses are kept.
pub async fn resolve_bind(
    host: Option<&str>,
    port: u16,
    family: Family,
    limit: usize,
) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = match host {
        Some(host) => lookup_host((host, port))
            .await
            .map_err(|source| TransportError::Resolve { host: host.to_owned(), port, source })?
            .filter(|addr| family.matches(addr))
            .take(limit)
            .collect(),
        None => [
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ]
        .into_iter()
        .filter(|addr| family.matches(addr))
        .take(limit)
        .collect(),
    };

    if addrs.is_empty() {
        let host = host.unwrap_or("*").to_owned();
        return Err(TransportError::NoAddress { host, port, family });
    }

    Ok(addrs)
}
