use std::net::SocketAddrV4;

use bytes::Bytes;
use pnet::packet::{
    icmp::{IcmpCode, IcmpTypes, MutableIcmpPacket},
    ip::IpNextHeaderProtocols,
    ipv4::MutableIpv4Packet,
    udp::MutableUdpPacket,
    Packet,
};

use crate::{checksum, Error};

/// ICMP header including the unused word of a destination unreachable message.
const ICMP_HEADER_LEN: usize = 8;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Length of a fabricated destination unreachable message.
pub const UNREACH_LEN: usize = ICMP_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;

/// Destination unreachable code for "communication administratively filtered".
pub const UNREACH_FILTER_PROHIB: IcmpCode = IcmpCode(13);

const DEFAULT_TTL: u8 = 64;

/// Fabricates an ICMP "destination unreachable, filtered" message that claims
/// the UDP datagram `foreign -> local` was rejected on its way.
///
/// The quoted IP header carries `foreign` as source and `local` as destination, the
/// quoted UDP header the matching ports. The returned bytes are the ICMP message
/// only; the raw socket adds the outer IP header.
pub fn fabricate_unreachable(foreign: SocketAddrV4, local: SocketAddrV4) -> Result<Bytes, Error> {
    let mut buf = vec![0u8; UNREACH_LEN];

    {
        let quoted = &mut buf[ICMP_HEADER_LEN..];

        let mut ip = MutableIpv4Packet::new(&mut quoted[..IPV4_HEADER_LEN])
            .ok_or(Error::BufferTooSmall("ipv4"))?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length((IPV4_HEADER_LEN + UDP_HEADER_LEN) as u16);
        ip.set_ttl(DEFAULT_TTL);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(*foreign.ip());
        ip.set_destination(*local.ip());
        let sum = checksum(ip.packet());
        ip.set_checksum(sum);

        let mut udp = MutableUdpPacket::new(&mut quoted[IPV4_HEADER_LEN..])
            .ok_or(Error::BufferTooSmall("udp"))?;
        udp.set_source(foreign.port());
        udp.set_destination(local.port());
        udp.set_length(UDP_HEADER_LEN as u16);
    }

    let mut icmp = MutableIcmpPacket::new(&mut buf[..]).ok_or(Error::BufferTooSmall("icmp"))?;
    icmp.set_icmp_type(IcmpTypes::DestinationUnreachable);
    icmp.set_icmp_code(UNREACH_FILTER_PROHIB);
    let sum = checksum(icmp.packet());
    icmp.set_checksum(sum);

    Ok(Bytes::from(buf))
}
