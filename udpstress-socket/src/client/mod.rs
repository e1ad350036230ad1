use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;
use udpstress_common::Stats;
use udpstress_transport::IcmpSocket;

mod driver;
mod flow;
mod socket;
pub use socket::*;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket for target {target}: {source}")]
    Socket { target: SocketAddr, source: io::Error },
    #[error("recv icmp: {0}")]
    IcmpRecv(io::Error),
}

/// Configuration of the request side.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Number of concurrently open flows.
    flows: usize,
    /// Upper bound of the delay between two requests of the same flow.
    resend_bound: Duration,
    /// Upper bound of the total time a flow waits for a response.
    wait_bound: Duration,
    /// Whether closed flows are left closed instead of being replaced.
    oneshot: bool,
    connected: bool,
    icmp_percentage: u8,
    request_again_percentage: u8,
    payload_bound: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            flows: 1000,
            resend_bound: Duration::from_secs(10),
            wait_bound: Duration::from_secs(30),
            oneshot: false,
            connected: true,
            icmp_percentage: 0,
            request_again_percentage: 0,
            payload_bound: None,
        }
    }
}

impl ClientOptions {
    /// Sets the number of concurrent flows.
    pub fn flows(mut self, flows: usize) -> Self {
        self.flows = flows;
        self
    }

    /// Sets the upper bound of the random delay between resends.
    pub fn resend_bound(mut self, bound: Duration) -> Self {
        self.resend_bound = bound;
        self
    }

    /// Sets the upper bound of the random total wait of a flow.
    pub fn wait_bound(mut self, bound: Duration) -> Self {
        self.wait_bound = bound;
        self
    }

    /// Opens every flow once and stops when all of them are closed.
    pub fn oneshot(mut self, oneshot: bool) -> Self {
        self.oneshot = oneshot;
        self
    }

    /// Whether flow sockets are connected to the target.
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Sets the percentage of transmissions replaced by a fabricated ICMP error.
    /// Takes effect only when the socket is given an ICMP socket and flows are
    /// connected.
    pub fn icmp_percentage(mut self, percentage: u8) -> Self {
        self.icmp_percentage = percentage;
        self
    }

    /// Sets the percentage of responses after which a flow sends another request
    /// instead of closing.
    pub fn request_again_percentage(mut self, percentage: u8) -> Self {
        self.request_again_percentage = percentage;
        self
    }

    /// Uses payloads of uniform random length in `[0, bound]` instead of the
    /// request literal.
    pub fn payload_bound(mut self, bound: Option<usize>) -> Self {
        self.payload_bound = bound;
        self
    }

    pub fn flow_count(&self) -> usize {
        self.flows
    }
}

/// The client state, shared between the driver and every flow.
#[derive(Debug)]
pub(crate) struct ClientState {
    pub(crate) options: ClientOptions,
    pub(crate) stats: Arc<Stats>,
    pub(crate) icmp: Option<Arc<IcmpSocket>>,
}
