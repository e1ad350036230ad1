use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{debug, error};
use udpstress_transport::Transport;

use crate::client::{
    flow::{ClientFlow, FlowExit},
    ClientError, ClientState,
};

pub(crate) struct ClientDriver<T: Transport> {
    /// Opens the socket of every flow.
    pub(crate) transport: T,
    pub(crate) target: SocketAddr,
    /// State shared with every flow.
    pub(crate) state: Arc<ClientState>,
    /// The open flows. A flow leaves the set exactly once, when it closes.
    pub(crate) flows: FuturesUnordered<ClientFlow>,
    pub(crate) icmp_buf: Vec<u8>,
}

impl<T: Transport> ClientDriver<T> {
    /// Opens a new flow towards the target and sends its first request.
    pub(crate) fn open_flow(&mut self) -> Result<(), ClientError> {
        let socket = self
            .transport
            .open_flow(self.target, self.state.options.connected)
            .map_err(|source| ClientError::Socket { target: self.target, source })?;

        let mut flow = ClientFlow::new(socket, self.target, Arc::clone(&self.state));
        flow.start();

        self.flows.push(flow);
        self.state.stats.increment_open();

        Ok(())
    }

    fn on_closed(&mut self, exit: FlowExit) -> Result<(), ClientError> {
        let open = self.state.stats.decrement_open();
        debug!(?exit, open, "flow closed");

        if !self.state.options.oneshot {
            self.open_flow()?;
        }

        Ok(())
    }
}

impl<T: Transport> Future for ClientDriver<T> {
    type Output = Result<(), ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if let Some(icmp) = &this.state.icmp {
                if let Poll::Ready(result) = icmp.poll_recv(cx, &mut this.icmp_buf) {
                    if let Err(e) = result {
                        error!(?e, "icmp receive failed");
                        return Poll::Ready(Err(ClientError::IcmpRecv(e)));
                    }

                    this.state.stats.increment_icmp_received();
                    continue;
                }
            }

            match this.flows.poll_next_unpin(cx) {
                Poll::Ready(Some(exit)) => {
                    this.on_closed(exit)?;
                    continue;
                }
                // Only reachable in oneshot mode, closed flows are replaced otherwise.
                Poll::Ready(None) => {
                    debug!("all flows closed");
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
