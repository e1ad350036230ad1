use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::FutureExt;
use socket2::SockRef;
use tokio::{
    io::ReadBuf,
    net::UdpSocket,
    time::{sleep, Instant, Sleep},
};
use tracing::trace;
use udpstress_common::{random_timeout, roll_percentage};
use udpstress_wire::payload::{self, REQUEST};

use crate::{
    client::ClientState, icmp_injection, send_icmp, Event, WaitBudget, RECV_BUFFER_SIZE,
};

/// Why a client flow closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowExit {
    /// A response (or a receive error) arrived.
    Responded,
    /// The wait budget ran out.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    /// Opened, nothing sent yet.
    Created,
    /// A request is out, waiting for a response or the timer.
    AwaitingEvent,
}

/// One request flow: a socket, a timer and the remaining wait budget. The flow
/// owns both its socket and its timer, so dropping it cancels both.
#[derive(Debug)]
pub(crate) struct ClientFlow {
    socket: UdpSocket,
    foreign: SocketAddr,
    connected: bool,
    budget: WaitBudget,
    flow_state: FlowState,
    timer: Pin<Box<Sleep>>,
    state: Arc<ClientState>,
}

impl ClientFlow {
    pub(crate) fn new(socket: UdpSocket, foreign: SocketAddr, state: Arc<ClientState>) -> Self {
        Self {
            socket,
            foreign,
            connected: state.options.connected,
            budget: WaitBudget::new(random_timeout(state.options.wait_bound)),
            flow_state: FlowState::Created,
            timer: Box::pin(sleep(std::time::Duration::ZERO)),
            state,
        }
    }

    /// Sends the first request and arms the timer.
    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.flow_state, FlowState::Created);
        self.transmit();
        self.flow_state = FlowState::AwaitingEvent;
    }

    /// Advances the flow. Returns `Some` when the flow is done and must be closed.
    pub(crate) fn on_event(&mut self, event: Event) -> Option<FlowExit> {
        match event {
            Event::Readable(result) => {
                match result {
                    Ok(len) => {
                        trace!(len, foreign = %self.foreign, "response");
                        self.state.stats.increment_recv();
                    }
                    Err(e) => {
                        trace!(?e, foreign = %self.foreign, "receive failed");
                        self.state.stats.increment_recv_errors();
                        return Some(FlowExit::Responded);
                    }
                }

                if roll_percentage(self.state.options.request_again_percentage) {
                    // The budget carries on where it was.
                    self.transmit();
                    return None;
                }

                Some(FlowExit::Responded)
            }
            Event::Timeout => {
                if self.budget.is_exhausted() {
                    return Some(FlowExit::Expired);
                }

                self.transmit();
                None
            }
        }
    }

    /// Sends a request (or an ICMP error in its place) and arms the timer for the
    /// next resend, within the remaining budget.
    fn transmit(&mut self) {
        if !self.try_inject_icmp() {
            let payload = payload::payload(self.state.options.payload_bound, REQUEST);
            // Straight to the kernel, a fresh registration has no cached write readiness.
            let socket = SockRef::from(&self.socket);
            let result = if self.connected {
                socket.send(&payload)
            } else {
                socket.send_to(&payload, &self.foreign.into())
            };

            match result {
                Ok(_) => self.state.stats.increment_send(),
                Err(e) => {
                    trace!(?e, foreign = %self.foreign, "send failed");
                    self.state.stats.increment_send_errors();
                }
            }
        }

        let delay = self.budget.schedule(random_timeout(self.state.options.resend_bound));
        self.timer.as_mut().reset(Instant::now() + delay);
    }

    fn try_inject_icmp(&self) -> bool {
        let Some(icmp) = &self.state.icmp else {
            return false;
        };
        if !self.connected {
            return false;
        }
        let Ok(local) = self.socket.local_addr() else {
            return false;
        };

        match icmp_injection(self.state.options.icmp_percentage, self.foreign, local) {
            Some((foreign, local)) => {
                send_icmp(icmp, foreign, local, &self.state.stats);
                true
            }
            None => false,
        }
    }
}

impl Future for ClientFlow {
    type Output = FlowExit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut storage = [0u8; RECV_BUFFER_SIZE];

        loop {
            // A response wins over a timer that expired in the same turn.
            let mut buf = ReadBuf::new(&mut storage);
            let readable = if this.connected {
                this.socket.poll_recv(cx, &mut buf)
            } else {
                this.socket.poll_recv_from(cx, &mut buf).map_ok(|_| ())
            };

            if let Poll::Ready(result) = readable {
                let len = buf.filled().len();
                if let Some(exit) = this.on_event(Event::Readable(result.map(|_| len))) {
                    return Poll::Ready(exit);
                }

                continue;
            }

            if this.timer.poll_unpin(cx).is_ready() {
                if let Some(exit) = this.on_event(Event::Timeout) {
                    return Poll::Ready(exit);
                }

                continue;
            }

            return Poll::Pending;
        }
    }
}
