use crate::PingResult;

pub(crate) mod v4;
pub(crate) mod v6;

/// Address family of a ping session. All family-specific wire handling is
/// dispatched through this tag; the rest of the crate never branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Family {
    V4,
    V6,
}

/// A decoded echo reply. Only the fields needed for correlation are kept.
#[derive(Debug)]
pub(crate) struct EchoReply {
    pub identifier: u16,
    pub sequence_number: u16,
    pub payload: Vec<u8>,
}

/// Builds one echo request message for the given family.
///
/// ICMPv4 carries a software checksum; for ICMPv6 the checksum field is left
/// zero because the kernel computes it over the pseudo-header on send.
pub(crate) fn encode_echo_request(
    family: Family,
    identifier: u16,
    sequence_number: u16,
    payload: &[u8],
) -> PingResult<Vec<u8>> {
    match family {
        Family::V4 => v4::encode_echo_request(identifier, sequence_number, payload),
        Family::V6 => v6::encode_echo_request(identifier, sequence_number, payload),
    }
}

/// Parses a received buffer as an ICMP message of the given family.
///
/// `Ok(None)` means the buffer is a well-formed ICMP message that is not an
/// echo reply (callers drop it silently); `Err(MalformedPacket)` means the
/// buffer cannot be parsed at all. The buffer must start at the ICMP header:
/// for raw IPv4 sockets the caller strips the IP header first (see
/// [`v4::strip_ip_header`]); IPv6 raw sockets and datagram sockets hand the
/// bare ICMP message to user space.
pub(crate) fn decode_echo_reply(family: Family, bytes: &[u8]) -> PingResult<Option<EchoReply>> {
    match family {
        Family::V4 => v4::decode_echo_reply(bytes),
        Family::V6 => v6::decode_echo_reply(bytes),
    }
}
