use pnet_packet::icmp::echo_reply::EchoReplyPacket;
use pnet_packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet_packet::icmp::{checksum, IcmpCode, IcmpPacket, IcmpTypes};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;

use super::EchoReply;
use crate::{PingError, PingResult};

pub(crate) fn encode_echo_request(
    identifier: u16,
    sequence_number: u16,
    payload: &[u8],
) -> PingResult<Vec<u8>> {
    let buf = vec![0u8; EchoRequestPacket::minimum_packet_size() + payload.len()];
    let mut packet = MutableEchoRequestPacket::owned(buf)
        .ok_or(PingError::MalformedPacket("could not build ICMPv4 echo request"))?;
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence_number);
    packet.set_payload(payload);

    let checksum = checksum(
        &IcmpPacket::new(packet.packet())
            .ok_or(PingError::MalformedPacket("could not checksum ICMPv4 echo request"))?,
    );
    packet.set_checksum(checksum);
    Ok(packet.packet().to_vec())
}

pub(crate) fn decode_echo_reply(bytes: &[u8]) -> PingResult<Option<EchoReply>> {
    let packet =
        IcmpPacket::new(bytes).ok_or(PingError::MalformedPacket("truncated ICMPv4 message"))?;
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return Ok(None);
    }
    let reply = EchoReplyPacket::new(bytes)
        .ok_or(PingError::MalformedPacket("truncated ICMPv4 echo reply"))?;
    Ok(Some(EchoReply {
        identifier: reply.get_identifier(),
        sequence_number: reply.get_sequence_number(),
        payload: reply.payload().to_vec(),
    }))
}

/// Skips the IPv4 header in front of the ICMP message.
///
/// Raw IPv4 sockets deliver the full IP packet to user space; datagram
/// sockets and IPv6 sockets do not. A buffer too short to carry an IPv4
/// header is returned unchanged and left to the decoder to reject.
pub(crate) fn strip_ip_header(bytes: &[u8]) -> &[u8] {
    if bytes.len() < Ipv4Packet::minimum_packet_size() {
        return bytes;
    }
    let header_len = usize::from(bytes[0] & 0x0F) * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > bytes.len() {
        return bytes;
    }
    &bytes[header_len..]
}
