use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
};

use tracing::{error, trace};
use udpstress_common::{roll_percentage, Stats};
use udpstress_transport::IcmpSocket;
use udpstress_wire::fabricate_unreachable;

mod budget;
mod client;
mod server;

pub use budget::WaitBudget;
pub use client::*;
pub use server::*;

/// Receive buffer size for responses and requests. Anything beyond is truncated,
/// only the arrival of a datagram matters.
const RECV_BUFFER_SIZE: usize = 16;

/// Receive buffer size for the raw ICMP socket.
const ICMP_BUFFER_SIZE: usize = 1500;

/// The events that drive a flow.
#[derive(Debug)]
pub enum Event {
    /// The flow's socket was readable. Carries the outcome of the receive.
    Readable(io::Result<usize>),
    /// The flow's timer expired.
    Timeout,
}

/// Decides whether the next transmission of a flow between `foreign` and `local` is
/// replaced by a fabricated ICMP error, and returns both endpoints if so.
///
/// Only IPv4 flows with a known local address qualify.
pub(crate) fn icmp_injection(
    percentage: u8,
    foreign: SocketAddr,
    local: SocketAddr,
) -> Option<(SocketAddrV4, SocketAddrV4)> {
    match (foreign, local) {
        (SocketAddr::V4(foreign), SocketAddr::V4(local))
            if !local.ip().is_unspecified() && roll_percentage(percentage) =>
        {
            Some((foreign, local))
        }
        _ => None,
    }
}

/// Sends an ICMP unreachable for the UDP path `foreign -> local` to `foreign`.
pub(crate) fn send_icmp(icmp: &IcmpSocket, foreign: SocketAddrV4, local: SocketAddrV4, stats: &Stats) {
    let packet = match fabricate_unreachable(foreign, local) {
        Ok(packet) => packet,
        Err(e) => {
            error!(?e, %foreign, %local, "failed to fabricate icmp");
            stats.increment_errors();
            return;
        }
    };

    match icmp.send_to(&packet, *foreign.ip()) {
        Ok(_) => stats.increment_icmp_sent(),
        Err(e) => {
            trace!(?e, %foreign, "icmp send failed");
            stats.increment_send_errors();
        }
    }
}
