use std::io;

use thiserror::Error;

pub type PingResult<T> = std::result::Result<T, PingError>;

/// Everything that can end a ping session.
///
/// Transient conditions (read-deadline expiry while polling, `ENOBUFS` on
/// send) are recovered internally and never show up here.
#[derive(Debug, Error)]
pub enum PingError {
    /// The target address could not be resolved to an IP address.
    #[error("could not resolve address `{0}`")]
    Resolution(String),

    /// The ICMP socket could not be opened, e.g. a raw socket was requested
    /// without the required privilege.
    #[error("could not open ICMP socket")]
    Bind(#[source] io::Error),

    /// A non-transient send or receive failure.
    #[error("transport failure")]
    Transport(#[source] io::Error),

    /// The overall deadline elapsed or the run was cancelled.
    #[error("ping timeout")]
    Timeout,

    /// A received buffer could not be parsed as an ICMP message of the
    /// session's address family.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
}
