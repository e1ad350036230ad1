use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{debug, error, info, trace};
use udpstress_transport::{
    ancillary::{AncillaryError, Datagram},
    is_recoverable, Listener, Transport,
};

use crate::server::{
    flow::{ReplyFlow, ReplySocket},
    ServerError, ServerState,
};

pub(crate) struct ServerDriver<T: Transport> {
    /// Opens connected reply sockets.
    pub(crate) transport: T,
    /// The listening sockets, persistently awaiting requests.
    pub(crate) listeners: Vec<Listener>,
    pub(crate) state: Arc<ServerState>,
    /// Replies waiting for their delay to expire.
    pub(crate) flows: FuturesUnordered<ReplyFlow>,
    /// Index of the listener polled first, rotated so no listener starves.
    pub(crate) next_listener: usize,
    pub(crate) recv_buf: Vec<u8>,
    pub(crate) icmp_buf: Vec<u8>,
}

impl<T: Transport> ServerDriver<T> {
    fn poll_listeners(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<(usize, io::Result<Result<Datagram, AncillaryError>>)> {
        let count = self.listeners.len();

        for offset in 0..count {
            let index = (self.next_listener + offset) % count;
            if let Poll::Ready(result) = self.listeners[index].poll_recv(cx, &mut self.recv_buf) {
                self.next_listener = (index + 1) % count;
                return Poll::Ready((index, result));
            }
        }

        Poll::Pending
    }

    /// Handles a request read from a listener. Errors returned from here are fatal.
    fn on_request(
        &mut self,
        index: usize,
        result: io::Result<Result<Datagram, AncillaryError>>,
    ) -> Result<(), ServerError> {
        let listener = &self.listeners[index];

        let datagram = match result {
            Ok(Ok(datagram)) => datagram,
            Ok(Err(AncillaryError::NoSource)) => {
                debug!(addr = %listener.local_addr(), "request without source address");
                self.state.stats.increment_recv_errors();
                return Ok(());
            }
            Ok(Err(source)) => {
                error!(addr = %listener.local_addr(), ?source, "cannot recover destination");
                return Err(ServerError::Ancillary { addr: listener.local_addr(), source });
            }
            Err(e) => {
                trace!(?e, addr = %listener.local_addr(), "receive failed");
                self.state.stats.increment_recv_errors();
                return Ok(());
            }
        };

        trace!(?datagram, "request");
        self.state.stats.increment_recv();

        let socket = if self.state.options.connected {
            match self.transport.open_reply(datagram.local, datagram.foreign) {
                Ok(socket) => ReplySocket::Connected(socket),
                Err(e) if is_recoverable(&e) => {
                    debug!(?e, local = %datagram.local, foreign = %datagram.foreign, "dropping request");
                    self.state.stats.increment_errors();
                    return Ok(());
                }
                Err(source) => {
                    error!(?source, local = %datagram.local, foreign = %datagram.foreign, "reply socket failed");
                    return Err(ServerError::ReplySocket {
                        local: datagram.local,
                        foreign: datagram.foreign,
                        source,
                    });
                }
            }
        } else {
            ReplySocket::Shared(Arc::clone(listener.socket()))
        };

        self.flows.push(ReplyFlow::new(
            socket,
            datagram.foreign,
            datagram.local,
            Arc::clone(&self.state),
        ));
        self.state.stats.increment_open();

        Ok(())
    }
}

impl<T: Transport> Future for ServerDriver<T> {
    type Output = Result<(), ServerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if let Some(icmp) = &this.state.icmp {
                if let Poll::Ready(result) = icmp.poll_recv(cx, &mut this.icmp_buf) {
                    if let Err(e) = result {
                        error!(?e, "icmp receive failed");
                        return Poll::Ready(Err(ServerError::IcmpRecv(e)));
                    }

                    this.state.stats.increment_icmp_received();
                    continue;
                }
            }

            if let Poll::Ready(Some(())) = this.flows.poll_next_unpin(cx) {
                let open = this.state.stats.decrement_open();
                trace!(open, "reply sent");

                if this.state.options.oneshot && this.flows.is_empty() {
                    info!("all replies sent, closing listeners");
                    this.listeners.clear();
                    return Poll::Ready(Ok(()));
                }

                continue;
            }

            // Requests stay queued in the kernel while the reply pool is full. A
            // completing reply wakes the driver again.
            if this.flows.len() < this.state.options.max_flows {
                if let Poll::Ready((index, result)) = this.poll_listeners(cx) {
                    this.on_request(index, result)?;
                    continue;
                }
            }

            return Poll::Pending;
        }
    }
}
