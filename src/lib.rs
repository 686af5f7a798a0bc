#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)] // TODO

//! An ICMP echo ("ping") library.
//!
//! A [`Pinger`] resolves one target address, sends echo requests on a fixed
//! interval and correlates the echo replies with the requests through a
//! timestamp embedded in the payload. Both IPv4 and IPv6 targets are
//! supported, over a raw socket (privileged mode) or an ICMP datagram socket
//! (no elevation required, but the OS must permit it, e.g.
//! `net.ipv4.ping_group_range` on Linux).
//!
//! ```no_run
//! use ping_lark::Pinger;
//!
//! let mut pinger = Pinger::new("localhost")?;
//! pinger.set_count(3);
//! pinger.on_receive(|output| {
//!     println!(
//!         "{} bytes from {}: icmp_seq={} time={:?}",
//!         output.package_size, output.ip_addr, output.sequence_number, output.ping_duration,
//!     );
//! });
//! pinger.run()?; // blocks until finished
//! let stats = pinger.statistics();
//! # Ok::<(), ping_lark::PingError>(())
//! ```
//!
//! `run` blocks the calling thread; a cloneable [`CancelToken`] passed to
//! [`Pinger::run_with_cancel`] stops a run from elsewhere. Both the run loop
//! and the internal receive thread observe cancellation within one poll
//! deadline (100 ms).

pub use ping_error::{PingError, PingResult};
pub use ping_output::PingOutput;
pub use pinger::{CancelToken, Pinger};
pub use stats::Statistics;

mod icmp;
mod ping_error;
mod ping_output;
mod ping_receiver;
mod pinger;
mod socket;
mod stats;
mod target;
mod timestamp;
