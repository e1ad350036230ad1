use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use futures::FutureExt;
use socket2::SockRef;
use tokio::{
    net::UdpSocket,
    time::{sleep, Sleep},
};
use tracing::trace;
use udpstress_common::random_timeout;
use udpstress_wire::payload::{self, REPLY, REPLY_CONNECTED};

use crate::{icmp_injection, send_icmp, server::ServerState, Event};

/// The socket a reply leaves from.
#[derive(Debug)]
pub(crate) enum ReplySocket {
    /// The listener the request arrived on.
    Shared(Arc<UdpSocket>),
    /// A socket of its own, bound to the request's destination and connected to its
    /// source. Closed with the flow.
    Connected(UdpSocket),
}

impl ReplySocket {
    fn literal(&self) -> &'static [u8] {
        match self {
            Self::Shared(_) => REPLY,
            Self::Connected(_) => REPLY_CONNECTED,
        }
    }
}

/// A reply pending its random delay. The listener stays in the awaiting-request
/// state; a reply flow only ever waits for its timer.
#[derive(Debug)]
pub(crate) struct ReplyFlow {
    socket: ReplySocket,
    /// The client.
    foreign: SocketAddr,
    /// The address the client targeted.
    local: SocketAddr,
    timer: Pin<Box<Sleep>>,
    state: Arc<ServerState>,
}

impl ReplyFlow {
    pub(crate) fn new(
        socket: ReplySocket,
        foreign: SocketAddr,
        local: SocketAddr,
        state: Arc<ServerState>,
    ) -> Self {
        let delay = random_timeout(state.options.delay_bound);
        Self { socket, foreign, local, timer: Box::pin(sleep(delay)), state }
    }

    /// Advances the flow. Returns `true` once the reply went out.
    pub(crate) fn on_event(&mut self, event: Event) -> bool {
        match event {
            Event::Timeout => {
                self.transmit();
                true
            }
            // Reply flows carry no read interest.
            Event::Readable(_) => false,
        }
    }

    fn transmit(&self) {
        if let Some(icmp) = &self.state.icmp {
            if let Some((foreign, local)) =
                icmp_injection(self.state.options.icmp_percentage, self.foreign, self.local)
            {
                send_icmp(icmp, foreign, local, &self.state.stats);
                return;
            }
        }

        let payload = payload::payload(self.state.options.payload_bound, self.socket.literal());
        let result = match &self.socket {
            ReplySocket::Shared(socket) => {
                SockRef::from(&**socket).send_to(&payload, &self.foreign.into())
            }
            ReplySocket::Connected(socket) => SockRef::from(socket).send(&payload),
        };

        match result {
            Ok(_) => self.state.stats.increment_send(),
            Err(e) => {
                trace!(?e, foreign = %self.foreign, "reply failed");
                self.state.stats.increment_send_errors();
            }
        }
    }
}

impl Future for ReplyFlow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            ready!(this.timer.poll_unpin(cx));
            if this.on_event(Event::Timeout) {
                return Poll::Ready(());
            }
        }
    }
}
