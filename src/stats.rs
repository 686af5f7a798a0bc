use std::net::IpAddr;
use std::time::Duration;

use crate::target::Target;

/// Point-in-time statistics of a running or finished ping session.
///
/// A snapshot is a pure function of the counters and samples it was computed
/// from; requesting it twice without an intervening event yields identical
/// values.
#[derive(Debug, Clone)]
pub struct Statistics {
    /// Number of echo requests transmitted.
    pub packets_sent: u64,
    /// Number of echo replies received and correlated.
    pub packets_recv: u64,
    /// Percentage of packets lost. Reported as `0.0` before the first send.
    pub packet_loss: f64,
    /// The address string the session was created with.
    pub addr: String,
    /// The resolved address of the pinged host.
    pub ip_addr: IpAddr,
    /// All round-trip times, in arrival order.
    pub rtts: Vec<Duration>,
    /// Minimum round-trip time, zero when no reply arrived.
    pub min_rtt: Duration,
    /// Maximum round-trip time, zero when no reply arrived.
    pub max_rtt: Duration,
    /// Mean round-trip time, zero when no reply arrived.
    pub avg_rtt: Duration,
    /// Population standard deviation of the round-trip times.
    pub std_dev_rtt: Duration,
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn snapshot(
    target: &Target,
    packets_sent: u64,
    packets_recv: u64,
    rtts: &[Duration],
) -> Statistics {
    let packet_loss = if packets_sent == 0 {
        0.0
    } else {
        (packets_sent - packets_recv) as f64 / packets_sent as f64 * 100.0
    };

    let mut min_rtt = Duration::ZERO;
    let mut max_rtt = Duration::ZERO;
    let mut total = Duration::ZERO;
    if let Some(&first) = rtts.first() {
        min_rtt = first;
        max_rtt = first;
    }
    for &rtt in rtts {
        min_rtt = min_rtt.min(rtt);
        max_rtt = max_rtt.max(rtt);
        total += rtt;
    }

    let mut avg_rtt = Duration::ZERO;
    let mut std_dev_rtt = Duration::ZERO;
    if !rtts.is_empty() {
        let len = rtts.len() as u32;
        avg_rtt = total / len;
        let avg_nanos = avg_rtt.as_nanos() as f64;
        let sum_squares: f64 = rtts
            .iter()
            .map(|rtt| {
                let deviation = rtt.as_nanos() as f64 - avg_nanos;
                deviation * deviation
            })
            .sum();
        std_dev_rtt = Duration::from_nanos((sum_squares / f64::from(len)).sqrt() as u64);
    }

    Statistics {
        packets_sent,
        packets_recv,
        packet_loss,
        addr: target.addr().to_string(),
        ip_addr: target.ip(),
        rtts: rtts.to_vec(),
        min_rtt,
        max_rtt,
        avg_rtt,
        std_dev_rtt,
    }
}
