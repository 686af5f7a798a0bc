use std::net::IpAddr;
use std::time::Duration;

/// One received and correlated echo reply, handed to the per-reply callback.
#[derive(Debug, Clone)]
pub struct PingOutput {
    /// Number of ICMP bytes in the reply.
    pub package_size: usize,
    /// Address of the pinged host.
    pub ip_addr: IpAddr,
    /// Sequence number echoed back by the remote host.
    pub sequence_number: u16,
    /// Round-trip time measured against the timestamp in the payload.
    pub ping_duration: Duration,
}
