use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::socket::Socket;
use crate::{PingError, PingResult};

/// Read deadline of one poll iteration. Bounds both the shutdown latency of
/// the receive thread and the cancellation latency of the run loop.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Capacity of the envelope queue between the receive thread and the run
/// loop. A full queue blocks the receive thread until the run loop catches
/// up.
pub(crate) const ENVELOPE_QUEUE_SIZE: usize = 5;

const RECV_BUFFER_SIZE: usize = 512;

/// Raw bytes as they came off the socket, not yet decoded.
pub(crate) struct Envelope {
    pub bytes: Vec<u8>,
    pub len: usize,
}

pub(crate) type EnvelopeSender = mpsc::SyncSender<PingResult<Envelope>>;
pub(crate) type EnvelopeReceiver = mpsc::Receiver<PingResult<Envelope>>;

pub(crate) fn envelope_channel() -> (EnvelopeSender, EnvelopeReceiver) {
    mpsc::sync_channel(ENVELOPE_QUEUE_SIZE)
}

/// Starts the receive thread: poll the socket with a short deadline, forward
/// every received buffer, re-check the halt signal once per iteration.
///
/// A non-timeout read error is forwarded through the envelope channel so the
/// run loop terminates instead of waiting on a queue that will stay empty,
/// and then ends the thread.
pub(crate) fn spawn_receive_loop<S>(
    socket: Arc<S>,
    envelope_tx: EnvelopeSender,
    halt_rx: mpsc::Receiver<()>,
) -> JoinHandle<()>
where
    S: Socket + 'static,
{
    std::thread::spawn(move || {
        loop {
            match halt_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            match socket.recv_from(&mut buf, POLL_TIMEOUT) {
                // Deadline expired, nothing received yet.
                Ok(None) => {}
                Ok(Some((len, from))) => {
                    tracing::trace!(len, %from, "received envelope");
                    let envelope = Envelope { bytes: buf, len };
                    // The run loop only drops its end on termination.
                    if envelope_tx.send(Ok(envelope)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "receive loop failed");
                    let _ = envelope_tx.send(Err(PingError::Transport(e)));
                    break;
                }
            }
        }
        tracing::trace!("receive loop ended");
    })
}
