use std::{net::SocketAddr, sync::Arc};

use futures::stream::FuturesUnordered;
use tracing::debug;
use udpstress_common::Stats;
use udpstress_transport::{bind_listeners, IcmpSocket, Listener, Transport};

use crate::{
    server::{driver::ServerDriver, ServerError, ServerOptions, ServerState},
    ICMP_BUFFER_SIZE, RECV_BUFFER_SIZE,
};

/// The reply side of the harness. Answers every request after a random delay.
#[derive(Debug)]
pub struct ServerSocket<T: Transport> {
    transport: T,
    options: ServerOptions,
    stats: Arc<Stats>,
    icmp: Option<Arc<IcmpSocket>>,
    listeners: Vec<Listener>,
}

impl<T: Transport> ServerSocket<T> {
    /// Creates a new server socket with the default [`ServerOptions`].
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ServerOptions::default())
    }

    pub fn with_options(transport: T, options: ServerOptions) -> Self {
        Self {
            transport,
            options,
            stats: Arc::new(Stats::default()),
            icmp: None,
            listeners: Vec::new(),
        }
    }

    /// Sets the raw socket used to inject ICMP errors and count incoming ones.
    pub fn with_icmp(mut self, icmp: IcmpSocket) -> Self {
        self.icmp = Some(Arc::new(icmp));
        self
    }

    /// Binds a listener on each of `addrs`. Addresses that cannot be bound are
    /// skipped, it fails only if none can.
    pub fn bind(&mut self, addrs: &[SocketAddr]) -> Result<(), ServerError> {
        let listeners = bind_listeners(addrs, self.options.connected)?;
        self.listeners.extend(listeners);
        Ok(())
    }

    /// The addresses the listeners are bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Serves requests. Only returns in oneshot mode, after the last pending reply
    /// went out, or on a fatal error.
    pub async fn run(self) -> Result<(), ServerError> {
        if self.listeners.is_empty() {
            return Err(ServerError::NotBound);
        }

        let driver = ServerDriver {
            transport: self.transport,
            listeners: self.listeners,
            state: Arc::new(ServerState {
                options: self.options,
                stats: self.stats,
                icmp: self.icmp,
            }),
            flows: FuturesUnordered::new(),
            next_listener: 0,
            recv_buf: vec![0; RECV_BUFFER_SIZE],
            icmp_buf: vec![0; ICMP_BUFFER_SIZE],
        };

        let result = driver.await;
        debug!(?result, "server driver finished");
        result
    }
}
