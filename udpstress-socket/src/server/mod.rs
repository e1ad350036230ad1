use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;
use udpstress_common::Stats;
use udpstress_transport::{ancillary::AncillaryError, IcmpSocket, TransportError};

mod driver;
mod flow;
mod socket;
pub use socket::*;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("recvmsg on {addr}: {source}")]
    Ancillary { addr: SocketAddr, source: AncillaryError },
    #[error("reply socket {local} to {foreign}: {source}")]
    ReplySocket { local: SocketAddr, foreign: SocketAddr, source: io::Error },
    #[error("recv icmp: {0}")]
    IcmpRecv(io::Error),
    #[error("socket is not bound")]
    NotBound,
}

/// Configuration of the reply side.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum number of pending replies. Listeners are not read while it is reached.
    max_flows: usize,
    /// Upper bound of the random delay before a reply.
    delay_bound: Duration,
    oneshot: bool,
    /// Whether every reply is sent from its own socket connected to the client.
    connected: bool,
    icmp_percentage: u8,
    payload_bound: Option<usize>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_flows: 1000,
            delay_bound: Duration::from_secs(10),
            oneshot: false,
            connected: false,
            icmp_percentage: 0,
            payload_bound: None,
        }
    }
}

impl ServerOptions {
    /// Sets the maximum number of concurrently pending replies.
    pub fn max_flows(mut self, max_flows: usize) -> Self {
        self.max_flows = max_flows;
        self
    }

    /// Sets the upper bound of the random delay before each reply.
    pub fn delay_bound(mut self, bound: Duration) -> Self {
        self.delay_bound = bound;
        self
    }

    /// Stops serving once the last pending reply has been sent.
    pub fn oneshot(mut self, oneshot: bool) -> Self {
        self.oneshot = oneshot;
        self
    }

    /// Replies from a dedicated socket bound to the request's destination and
    /// connected to its source. Listeners are bound with address reuse enabled.
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Sets the percentage of replies replaced by a fabricated ICMP error.
    pub fn icmp_percentage(mut self, percentage: u8) -> Self {
        self.icmp_percentage = percentage;
        self
    }

    /// Uses payloads of uniform random length in `[0, bound]` instead of the reply
    /// literals.
    pub fn payload_bound(mut self, bound: Option<usize>) -> Self {
        self.payload_bound = bound;
        self
    }
}

/// The server state, shared between the driver and every reply flow.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) options: ServerOptions,
    pub(crate) stats: Arc<Stats>,
    pub(crate) icmp: Option<Arc<IcmpSocket>>,
}
