use std::net::{IpAddr, ToSocketAddrs};

use crate::icmp::Family;
use crate::{PingError, PingResult};

/// The resolved destination of a ping session. Resolution happens once at
/// construction; the target never changes while a run is in progress.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    addr: String,
    ip: IpAddr,
}

impl Target {
    /// Resolves `addr`, which may be an IP literal or a DNS name, to the
    /// first address the resolver yields.
    pub(crate) fn resolve(addr: &str) -> PingResult<Target> {
        let mut resolved = (addr, 0u16).to_socket_addrs().map_err(|e| {
            tracing::debug!(addr, error = %e, "address resolution failed");
            PingError::Resolution(addr.to_string())
        })?;
        let ip = resolved
            .next()
            .map(|sockaddr| sockaddr.ip())
            .ok_or_else(|| PingError::Resolution(addr.to_string()))?;
        Ok(Target {
            addr: addr.to_string(),
            ip,
        })
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn ip(&self) -> IpAddr {
        self.ip
    }

    pub(crate) fn family(&self) -> Family {
        match self.ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}
