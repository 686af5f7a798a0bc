use pnet_packet::icmpv6::echo_reply::EchoReplyPacket;
use pnet_packet::icmpv6::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet_packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types};
use pnet_packet::Packet;

use super::EchoReply;
use crate::{PingError, PingResult};

// The ICMPv6 checksum covers an IPv6 pseudo-header which is only known to
// the kernel at send time, so the checksum field stays zero here and the
// kernel fills it in (RFC 4443, section 2.3).
pub(crate) fn encode_echo_request(
    identifier: u16,
    sequence_number: u16,
    payload: &[u8],
) -> PingResult<Vec<u8>> {
    let buf = vec![0u8; EchoRequestPacket::minimum_packet_size() + payload.len()];
    let mut packet = MutableEchoRequestPacket::owned(buf)
        .ok_or(PingError::MalformedPacket("could not build ICMPv6 echo request"))?;
    packet.set_icmpv6_type(Icmpv6Types::EchoRequest);
    packet.set_icmpv6_code(Icmpv6Code::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence_number);
    packet.set_payload(payload);
    Ok(packet.packet().to_vec())
}

pub(crate) fn decode_echo_reply(bytes: &[u8]) -> PingResult<Option<EchoReply>> {
    let packet =
        Icmpv6Packet::new(bytes).ok_or(PingError::MalformedPacket("truncated ICMPv6 message"))?;
    if packet.get_icmpv6_type() != Icmpv6Types::EchoReply {
        return Ok(None);
    }
    let reply = EchoReplyPacket::new(bytes)
        .ok_or(PingError::MalformedPacket("truncated ICMPv6 echo reply"))?;
    Ok(Some(EchoReply {
        identifier: reply.get_identifier(),
        sequence_number: reply.get_sequence_number(),
        payload: reply.payload().to_vec(),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use pnet_packet::icmpv6::echo_reply::MutableEchoReplyPacket;

    use super::*;

    /// Same request-to-reply flip as the IPv4 helper. The checksum stays
    /// zero on both sides since the kernel owns it for ICMPv6.
    pub(crate) fn reply_from_request(request: &[u8]) -> Vec<u8> {
        let mut packet = MutableEchoReplyPacket::owned(request.to_vec())
            .expect("request too short for an echo reply");
        packet.set_icmpv6_type(Icmpv6Types::EchoReply);
        packet.packet().to_vec()
    }

    #[test]
    fn encoded_request_has_echo_request_type_and_zero_checksum() {
        let encoded = encode_echo_request(0x1234, 42, &[0x01u8; 8]).unwrap();
        let packet = Icmpv6Packet::new(&encoded).unwrap();
        assert_eq!(Icmpv6Types::EchoRequest, packet.get_icmpv6_type());
        assert_eq!(0, packet.get_checksum());
    }

    #[test]
    fn non_echo_icmpv6_message_decodes_to_none() {
        // Minimal packet-too-big message (type 2).
        let bytes = [2u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(decode_echo_reply(&bytes).unwrap().is_none());
    }
}
