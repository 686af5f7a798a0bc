use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Type};

use crate::icmp::Family;

/// Raw ICMP socket (needs privilege) vs ICMP datagram socket (needs the OS
/// to allow it, e.g. `net.ipv4.ping_group_range` on Linux).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SocketMode {
    Raw,
    Dgram,
}

/// One connection handle shared between the run loop (sends) and the receive
/// thread (reads), hence `Send + Sync`.
pub(crate) trait Socket: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: &socket2::SockAddr) -> io::Result<usize>;

    /// Receives one message, waiting at most `timeout`. `Ok(None)` is the
    /// distinguished deadline-expiry outcome; it means "no data yet", never
    /// session failure.
    fn recv_from(&self, buf: &mut [u8], timeout: Duration)
        -> io::Result<Option<(usize, IpAddr)>>;
}

pub(crate) struct IcmpSocket {
    socket: socket2::Socket,
}

impl IcmpSocket {
    pub(crate) fn open(
        family: Family,
        mode: SocketMode,
        source: Option<IpAddr>,
    ) -> io::Result<IcmpSocket> {
        let (domain, protocol) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let type_ = match mode {
            SocketMode::Raw => Type::RAW,
            SocketMode::Dgram => Type::DGRAM,
        };
        tracing::trace!(?family, ?mode, "opening ICMP socket");
        let socket = socket2::Socket::new(domain, type_, Some(protocol))?;
        if let Some(source) = source {
            socket.bind(&SocketAddr::new(source, 0).into())?;
        }
        Ok(IcmpSocket { socket })
    }
}

impl Socket for IcmpSocket {
    fn send_to(&self, buf: &[u8], addr: &socket2::SockAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, IpAddr)>> {
        self.socket.set_read_timeout(Some(timeout))?;

        // Socket2 gives a safety guarantee which allows us to do an unsafe
        // cast from `&mut [u8]` to `&mut [std::mem::MaybeUninit<u8>]`:
        // https://docs.rs/socket2/0.4.7/socket2/struct.Socket.html#method.recv
        let recv_result = self.socket.recv_from(unsafe {
            &mut *(std::ptr::addr_of_mut!(*buf) as *mut [std::mem::MaybeUninit<u8>])
        });
        match recv_result {
            Ok((n, addr)) => {
                let ip = addr
                    .as_socket()
                    .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |sockaddr| sockaddr.ip());
                Ok(Some((n, ip)))
            }
            // A deadline expiry reports as WouldBlock or TimedOut depending
            // on the platform.
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
