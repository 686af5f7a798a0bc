use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant, SystemTime};

use crate::icmp::{self, Family};
use crate::ping_output::PingOutput;
use crate::ping_receiver::{self, Envelope, EnvelopeReceiver, POLL_TIMEOUT};
use crate::socket::{IcmpSocket, Socket, SocketMode};
use crate::stats::{self, Statistics};
use crate::target::Target;
use crate::timestamp::{self, TIMESTAMP_LEN};
use crate::{PingError, PingResult};

/// Cloneable handle that stops a running [`Pinger`] from another thread.
///
/// Both the run loop and the receive thread observe cancellation within one
/// poll deadline (100 ms).
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type OnReceiveHandler = Box<dyn FnMut(&PingOutput)>;
type OnFinishHandler = Box<dyn FnMut(&Statistics)>;

/// An ICMP echo session against one resolved target.
///
/// Configuration is meant to be done before [`Pinger::run`]; the setters are
/// not designed to be called concurrently with a run. All session state
/// (sequence number, counters, samples) is owned and mutated by the run loop
/// alone; the receive thread only produces raw envelopes.
pub struct Pinger {
    interval: Duration,
    count: i64,
    payload_size: usize,
    privileged: bool,
    source: Option<IpAddr>,

    target: Target,
    identifier: u16,
    sequence_number: u16,
    packets_sent: u64,
    packets_recv: u64,
    rtts: Vec<Duration>,

    on_receive: Option<OnReceiveHandler>,
    on_finish: Option<OnFinishHandler>,
}

impl Pinger {
    /// Resolves `addr` (IP literal or DNS name) and creates a session with
    /// the defaults: 1 second interval, unbounded count, 8 byte payload,
    /// unprivileged socket.
    pub fn new(addr: &str) -> PingResult<Pinger> {
        let target = Target::resolve(addr)?;
        Ok(Pinger {
            interval: Duration::from_secs(1),
            count: -1,
            payload_size: TIMESTAMP_LEN,
            privileged: false,
            source: None,
            target,
            identifier: rand::random::<u16>(),
            sequence_number: 0,
            packets_sent: 0,
            packets_recv: 0,
            rtts: Vec::new(),
            on_receive: None,
            on_finish: None,
        })
    }

    /// Wait time between two echo requests.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of echo packets to send and receive before the run finishes.
    /// Zero or negative means the run continues until cancelled.
    pub fn set_count(&mut self, count: i64) {
        self.count = count;
    }

    #[must_use]
    pub fn count(&self) -> i64 {
        self.count
    }

    /// Payload size in bytes. The first 8 bytes always hold the send
    /// timestamp, so anything below 8 is clamped to 8.
    pub fn set_payload_size(&mut self, size: usize) {
        if size < TIMESTAMP_LEN {
            tracing::warn!(size, "payload size clamped to fit the timestamp");
        }
        self.payload_size = size.max(TIMESTAMP_LEN);
    }

    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// `true` sends over a raw ICMP socket (requires privilege), `false`
    /// over an ICMP datagram socket.
    pub fn set_privileged(&mut self, privileged: bool) {
        self.privileged = privileged;
    }

    #[must_use]
    pub fn privileged(&self) -> bool {
        self.privileged
    }

    /// Local address to bind the socket to.
    pub fn set_source(&mut self, source: Option<IpAddr>) {
        self.source = source;
    }

    #[must_use]
    pub fn source(&self) -> Option<IpAddr> {
        self.source
    }

    /// The address string the session was created with.
    #[must_use]
    pub fn addr(&self) -> &str {
        self.target.addr()
    }

    /// The resolved address of the target host.
    #[must_use]
    pub fn ip_addr(&self) -> IpAddr {
        self.target.ip()
    }

    /// Registers a handler invoked for every correlated echo reply. It runs
    /// on the thread that called `run` and should not block for long.
    pub fn on_receive<F>(&mut self, handler: F)
    where
        F: FnMut(&PingOutput) + 'static,
    {
        self.on_receive = Some(Box::new(handler));
    }

    /// Registers a handler invoked once with the final statistics when a run
    /// reaches a terminal state, no matter how it ended.
    pub fn on_finish<F>(&mut self, handler: F)
    where
        F: FnMut(&Statistics) + 'static,
    {
        self.on_finish = Some(Box::new(handler));
    }

    /// Statistics of the session so far. Callable during and after a run.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        stats::snapshot(&self.target, self.packets_sent, self.packets_recv, &self.rtts)
    }

    /// Runs the session. Blocks until the configured count is sent and
    /// received, the fallback deadline elapses, or a fatal error occurs.
    pub fn run(&mut self) -> PingResult<()> {
        self.run_with_cancel(&CancelToken::new())
    }

    /// Like [`Pinger::run`], but additionally observes `cancel`.
    /// Cancellation ends the run with [`PingError::Timeout`].
    pub fn run_with_cancel(&mut self, cancel: &CancelToken) -> PingResult<()> {
        let mode = if self.privileged {
            SocketMode::Raw
        } else {
            SocketMode::Dgram
        };
        let socket = IcmpSocket::open(self.target.family(), mode, self.source)
            .map_err(PingError::Bind)?;
        self.run_loop(Arc::new(socket), cancel)
    }

    fn run_loop<S>(&mut self, socket: Arc<S>, cancel: &CancelToken) -> PingResult<()>
    where
        S: Socket + 'static,
    {
        let (envelope_tx, envelope_rx) = ping_receiver::envelope_channel();
        let (halt_tx, halt_rx) = mpsc::channel::<()>();
        let receive_thread =
            ping_receiver::spawn_receive_loop(socket.clone(), envelope_tx, halt_rx);

        let result = self.event_loop(&*socket, &envelope_rx, cancel);

        // Halt and join the receive thread before the socket handle is
        // released; dropping our queue end unblocks a receive thread that is
        // mid-push into a full queue.
        let _ = halt_tx.send(());
        drop(envelope_rx);
        if receive_thread.join().is_err() {
            tracing::error!("receive thread panicked");
        }
        drop(socket);

        let statistics = self.statistics();
        if let Some(handler) = self.on_finish.as_mut() {
            handler(&statistics);
        }
        result
    }

    /// The event loop: multiplexes queued envelopes, interval ticks and
    /// cancellation, none with fixed priority. The wait is capped at
    /// [`POLL_TIMEOUT`] so cancellation and the fallback deadline are
    /// observed promptly even with long send intervals.
    fn event_loop<S>(
        &mut self,
        socket: &S,
        envelope_rx: &EnvelopeReceiver,
        cancel: &CancelToken,
    ) -> PingResult<()>
    where
        S: Socket,
    {
        let target_count = self.target_count();
        let deadline = target_count.map(|count| {
            // Bounds the whole run so sustained loss cannot hang it forever.
            let factor = u32::try_from(count.saturating_add(2)).unwrap_or(u32::MAX);
            Instant::now() + self.interval.saturating_mul(factor)
        });

        // The first request goes out immediately, not after one interval.
        self.send_one(socket)?;
        let mut next_send = Instant::now() + self.interval;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("run cancelled");
                return Err(PingError::Timeout);
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                tracing::debug!("fallback deadline elapsed");
                return Err(PingError::Timeout);
            }

            let wait = next_send
                .saturating_duration_since(Instant::now())
                .min(POLL_TIMEOUT);
            match envelope_rx.recv_timeout(wait) {
                Ok(Ok(envelope)) => {
                    if self.process_envelope(&envelope)? {
                        if let Some(count) = target_count {
                            if self.packets_sent >= count && self.packets_recv >= count {
                                return Ok(());
                            }
                        }
                    }
                }
                // The receive thread hit a fatal read error and forwarded it.
                Ok(Err(e)) => return Err(e),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(PingError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "receive loop ended unexpectedly",
                    )));
                }
            }

            if Instant::now() >= next_send {
                // With a bounded count, ticks past the count stop
                // transmitting; the run then either collects the outstanding
                // replies or hits the fallback deadline.
                if target_count.map_or(true, |count| self.packets_sent < count) {
                    self.send_one(socket)?;
                }
                next_send += self.interval;
            }
        }
    }

    /// Builds and transmits one echo request, then increments the sent
    /// counter and the sequence number exactly once.
    ///
    /// `ENOBUFS` retries the same buffer until the kernel accepts it; a
    /// blocked tick is preferable to a gap in the sequence numbering.
    fn send_one<S>(&mut self, socket: &S) -> PingResult<()>
    where
        S: Socket,
    {
        let payload = timestamp::payload_now(self.payload_size);
        let packet = icmp::encode_echo_request(
            self.target.family(),
            self.identifier,
            self.sequence_number,
            &payload,
        )?;
        let dest: socket2::SockAddr = SocketAddr::new(self.target.ip(), 0).into();

        loop {
            match socket.send_to(&packet, &dest) {
                Ok(_) => break,
                Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                    tracing::warn!("send buffer exhausted, retrying");
                }
                Err(e) => return Err(PingError::Transport(e)),
            }
        }

        tracing::trace!(sequence_number = self.sequence_number, "echo request sent");
        self.packets_sent += 1;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        Ok(())
    }

    /// Decodes one envelope. Returns `Ok(true)` when it was a correlated
    /// echo reply, `Ok(false)` when it was some other ICMP message that is
    /// silently dropped.
    fn process_envelope(&mut self, envelope: &Envelope) -> PingResult<bool> {
        let family = self.target.family();
        let mut bytes = &envelope.bytes[..envelope.len];
        if family == Family::V4 && self.privileged {
            // Raw IPv4 sockets deliver the IP header; IPv6 and datagram
            // sockets do not.
            bytes = icmp::v4::strip_ip_header(bytes);
        }

        let reply = match icmp::decode_echo_reply(family, bytes)? {
            None => {
                tracing::trace!("ignoring non-reply ICMP message");
                return Ok(false);
            }
            Some(reply) => reply,
        };
        if reply.payload.len() < TIMESTAMP_LEN {
            return Err(PingError::MalformedPacket(
                "echo reply payload too short for a timestamp",
            ));
        }

        let mut stamp = [0u8; TIMESTAMP_LEN];
        stamp.copy_from_slice(&reply.payload[..TIMESTAMP_LEN]);
        let sent_at = timestamp::unpack(stamp);
        let rtt = SystemTime::now()
            .duration_since(sent_at)
            .unwrap_or(Duration::ZERO);

        self.packets_recv += 1;
        self.rtts.push(rtt);

        let output = PingOutput {
            package_size: envelope.len,
            ip_addr: self.target.ip(),
            sequence_number: reply.sequence_number,
            ping_duration: rtt,
        };
        if let Some(handler) = self.on_receive.as_mut() {
            handler(&output);
        }
        Ok(true)
    }

    fn target_count(&self) -> Option<u64> {
        u64::try_from(self.count).ok().filter(|&count| count > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use more_asserts::{assert_ge, assert_le, assert_lt};

    use super::*;
    use crate::socket::tests::{OnReceive, OnSend, SocketMock};

    fn localhost_pinger(count: i64, interval: Duration) -> Pinger {
        let mut pinger = Pinger::new("127.0.0.1").unwrap();
        pinger.set_count(count);
        pinger.set_interval(interval);
        pinger
    }

    #[test]
    fn bounded_run_against_responsive_target_succeeds() {
        let socket = Arc::new(SocketMock::new(OnSend::EchoBack, OnReceive::EchoBack));
        let mut pinger = localhost_pinger(3, Duration::from_millis(10));

        let outputs: Rc<RefCell<Vec<PingOutput>>> = Rc::new(RefCell::new(vec![]));
        let outputs_in_handler = outputs.clone();
        pinger.on_receive(move |output| outputs_in_handler.borrow_mut().push(output.clone()));

        let result = pinger.run_loop(socket.clone(), &CancelToken::new());
        assert!(result.is_ok());

        let stats = pinger.statistics();
        assert_eq!(3, stats.packets_sent);
        assert_eq!(3, stats.packets_recv);
        assert!((stats.packet_loss - 0.0).abs() < f64::EPSILON);
        assert_eq!(3, stats.rtts.len());
        for rtt in &stats.rtts {
            assert_lt!(*rtt, Duration::from_secs(1));
        }
        socket.should_send_number_of_messages(3);

        let outputs = outputs.borrow();
        let sequence_numbers: Vec<u16> =
            outputs.iter().map(|output| output.sequence_number).collect();
        assert_eq!(vec![0, 1, 2], sequence_numbers);
    }

    #[test]
    fn unresponsive_target_times_out_with_full_loss() {
        let socket = Arc::new(SocketMock::new(OnSend::Swallow, OnReceive::Silent));
        let interval = Duration::from_millis(10);
        let mut pinger = localhost_pinger(3, interval);

        let finish_stats: Rc<RefCell<Option<Statistics>>> = Rc::new(RefCell::new(None));
        let finish_stats_in_handler = finish_stats.clone();
        pinger.on_finish(move |stats| {
            *finish_stats_in_handler.borrow_mut() = Some(stats.clone());
        });

        let started = Instant::now();
        let result = pinger.run_loop(socket.clone(), &CancelToken::new());
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(PingError::Timeout)));
        // Fallback deadline is interval * (count + 2).
        assert_ge!(elapsed, interval * 5);
        assert_lt!(elapsed, interval * 5 + POLL_TIMEOUT + POLL_TIMEOUT);

        let stats = finish_stats.borrow().clone().expect("on_finish not called");
        assert_eq!(3, stats.packets_sent);
        assert_eq!(0, stats.packets_recv);
        assert!((stats.packet_loss - 100.0).abs() < f64::EPSILON);
        socket.should_send_number_of_messages(3);
    }

    #[test]
    fn malformed_reply_fails_the_run_without_counting_it() {
        let socket = Arc::new(SocketMock::new(OnSend::EchoBack, OnReceive::GarbageOnce));
        let mut pinger = localhost_pinger(1, Duration::from_millis(10));

        let result = pinger.run_loop(socket, &CancelToken::new());
        assert!(matches!(result, Err(PingError::MalformedPacket(_))));
        assert_eq!(0, pinger.statistics().packets_recv);
    }

    #[test]
    fn non_reply_icmp_messages_are_ignored() {
        let socket = Arc::new(SocketMock::new(OnSend::EchoBack, OnReceive::NonReplyOnce));
        let mut pinger = localhost_pinger(1, Duration::from_millis(10));

        let result = pinger.run_loop(socket, &CancelToken::new());
        assert!(result.is_ok());
        let stats = pinger.statistics();
        assert_eq!(1, stats.packets_sent);
        assert_eq!(1, stats.packets_recv);
    }

    #[test]
    fn enobufs_is_retried_without_touching_the_counters() {
        let socket = Arc::new(SocketMock::new(OnSend::Enobufs(2), OnReceive::EchoBack));
        let mut pinger = localhost_pinger(1, Duration::from_millis(10));

        let result = pinger.run_loop(socket.clone(), &CancelToken::new());
        assert!(result.is_ok());
        assert_eq!(1, pinger.statistics().packets_sent);
        socket.should_send_number_of_messages(1);
    }

    #[test]
    fn send_error_aborts_the_run() {
        let socket = Arc::new(SocketMock::new(OnSend::ReturnErr, OnReceive::Silent));
        let mut pinger = localhost_pinger(3, Duration::from_millis(10));

        let result = pinger.run_loop(socket, &CancelToken::new());
        assert!(matches!(result, Err(PingError::Transport(_))));
        assert_eq!(0, pinger.statistics().packets_sent);
    }

    #[test]
    fn receiver_read_error_terminates_the_run() {
        let socket = Arc::new(SocketMock::new(OnSend::Swallow, OnReceive::ReturnErr));
        // Long interval and unbounded count: only the forwarded receiver
        // error can end this run.
        let mut pinger = localhost_pinger(-1, Duration::from_secs(10));

        let started = Instant::now();
        let result = pinger.run_loop(socket, &CancelToken::new());
        assert!(matches!(result, Err(PingError::Transport(_))));
        assert_lt!(started.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn cancellation_ends_the_run_promptly() {
        let socket = Arc::new(SocketMock::new(OnSend::Swallow, OnReceive::Silent));
        let mut pinger = localhost_pinger(10, Duration::from_millis(20));

        let cancel = CancelToken::new();
        let cancel_from_elsewhere = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel_from_elsewhere.cancel();
        });

        let started = Instant::now();
        let result = pinger.run_loop(socket, &cancel);
        let elapsed = started.elapsed();
        canceller.join().unwrap();

        assert!(matches!(result, Err(PingError::Timeout)));
        assert_lt!(elapsed, Duration::from_millis(50) + 2 * POLL_TIMEOUT);

        let stats = pinger.statistics();
        assert_le!(stats.packets_recv, stats.packets_sent);
        assert_lt!(stats.packets_sent, 10);
    }

    #[test]
    fn statistics_before_any_send_are_all_zero() {
        let pinger = localhost_pinger(1, Duration::from_millis(10));
        let stats = pinger.statistics();
        assert_eq!(0, stats.packets_sent);
        assert!((stats.packet_loss - 0.0).abs() < f64::EPSILON);
        assert_eq!("127.0.0.1", stats.addr);
    }

    #[test]
    fn payload_size_below_the_timestamp_is_clamped() {
        let mut pinger = localhost_pinger(1, Duration::from_millis(10));
        pinger.set_payload_size(4);
        assert_eq!(TIMESTAMP_LEN, pinger.payload_size());
        pinger.set_payload_size(56);
        assert_eq!(56, pinger.payload_size());
    }

    #[test]
    fn larger_payload_round_trips() {
        let socket = Arc::new(SocketMock::new(OnSend::EchoBack, OnReceive::EchoBack));
        let mut pinger = localhost_pinger(1, Duration::from_millis(10));
        pinger.set_payload_size(56);

        let result = pinger.run_loop(socket, &CancelToken::new());
        assert!(result.is_ok());
        assert_eq!(1, pinger.statistics().packets_recv);
    }
}
