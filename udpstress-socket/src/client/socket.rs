use std::{net::SocketAddr, sync::Arc};

use futures::stream::FuturesUnordered;
use tracing::{debug, info};
use udpstress_common::Stats;
use udpstress_transport::{IcmpSocket, Transport};

use crate::{
    client::{driver::ClientDriver, ClientError, ClientOptions, ClientState},
    ICMP_BUFFER_SIZE,
};

/// The request side of the harness. Keeps a pool of flows open against one target.
#[derive(Debug)]
pub struct ClientSocket<T: Transport> {
    transport: T,
    options: ClientOptions,
    stats: Arc<Stats>,
    icmp: Option<Arc<IcmpSocket>>,
}

impl<T: Transport> ClientSocket<T> {
    /// Creates a new client socket with the default [`ClientOptions`].
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    pub fn with_options(transport: T, options: ClientOptions) -> Self {
        Self { transport, options, stats: Arc::new(Stats::default()), icmp: None }
    }

    /// Sets the raw socket used to inject ICMP errors and count incoming ones.
    pub fn with_icmp(mut self, icmp: IcmpSocket) -> Self {
        self.icmp = Some(Arc::new(icmp));
        self
    }

    /// The statistics of this socket, shared with the driver.
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Opens the initial flows against `target` and drives them. Only returns in
    /// oneshot mode, once every flow is closed, or on a fatal error.
    pub async fn run(self, target: SocketAddr) -> Result<(), ClientError> {
        let state = Arc::new(ClientState {
            options: self.options,
            stats: self.stats,
            icmp: self.icmp,
        });

        let mut driver = ClientDriver {
            transport: self.transport,
            target,
            state,
            flows: FuturesUnordered::new(),
            icmp_buf: vec![0; ICMP_BUFFER_SIZE],
        };

        let flows = driver.state.options.flow_count();
        for _ in 0..flows {
            driver.open_flow()?;
        }
        info!(flows, %target, "opened flows");

        let result = driver.await;
        debug!(?result, "client driver finished");
        result
    }
}
