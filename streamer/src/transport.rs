//! Producer-side transport endpoints.
//!
//! Two send modes exist, fixed per destination by configuration:
//!
//! - Publish: a pooled connection per destination. Frames pass through a
//!   bounded channel (the high-water mark) drained by a writer thread; a
//!   full channel drops the batch and reports it as a value, never an
//!   error. A companion thread reads acks arriving on the same connection
//!   and feeds the queue tracker.
//! - Request/reply: one connection per send with strict send-then-read
//!   state, closed afterwards. The caller blocks until one ack per item
//!   has arrived or the deadline expires.
//!
//! Connections are lazy: the first send to a destination establishes them.
//! A freshly connected publisher tolerates a short readiness delay; connect
//! failures are surfaced immediately with no retry.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError, bounded};
use log::{debug, warn};

use shared::config::{ChannelMode, TransportConfig};
use shared::errors::TransportError;
use shared::messages::{AckMessage, Envelope, codec};

use crate::queue_tracker::QueueTracker;

/// Build the opaque transport URL for a destination. Callers treat the
/// result as an identifier only.
pub fn transport_url(host: &str, port: u16, _mode: ChannelMode) -> String {
    format!("tcp://{host}:{port}")
}

/// Result of a non-blocking publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The frame was queued for the writer thread.
    Sent,
    /// The outbound queue was at its high-water mark; the frame was dropped.
    Busy,
}

/// Pooled publisher connection. The struct only holds the channel sender;
/// the writer and ack-reader threads are detached and exit when the sender
/// side disconnects or the peer goes away.
struct Publisher {
    destination: String,
    tx: Sender<Vec<u8>>,
}

impl Publisher {
    fn connect(
        destination: &str,
        ready_delay: Duration,
        high_water_mark: usize,
        tracker: Arc<QueueTracker>,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(destination).map_err(|source| TransportError::Connect {
            destination: destination.to_string(),
            source,
        })?;
        let _ = stream.set_nodelay(true);

        // The peer may still be wiring up its connection thread; give it a
        // moment before the first frame. There are no connect retries.
        if !ready_delay.is_zero() {
            thread::sleep(ready_delay);
        }

        let reader = stream.try_clone().map_err(|source| TransportError::Connect {
            destination: destination.to_string(),
            source,
        })?;

        let (tx, rx) = bounded::<Vec<u8>>(high_water_mark);

        let dest = destination.to_string();
        spawn_detached(&format!("pub_writer_{destination}"), move || {
            let mut stream = stream;
            for frame in rx.iter() {
                if let Err(e) = codec::write_frame(&mut stream, &frame) {
                    warn!("publisher to `{dest}`: write failed: {e}");
                    break;
                }
            }
            // Unblocks the ack reader on the cloned handle.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("publisher writer for `{dest}` exited");
        })?;

        let dest = destination.to_string();
        spawn_detached(&format!("pub_acks_{destination}"), move || {
            let mut reader = reader;
            loop {
                match codec::read_frame(&mut reader) {
                    Ok(Some(buf)) => match codec::decode(&buf) {
                        Ok(Envelope::Ack(ack)) => match ack.item_id {
                            Some(id) => tracker.mark_ack(&id, ack.status, ack.reason.as_deref()),
                            None => warn!("ack without item id from `{dest}`"),
                        },
                        Ok(Envelope::Batch(_)) => warn!("unexpected batch frame from `{dest}`"),
                        Err(e) => warn!("undecodable frame from `{dest}`: {e}"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!("ack stream from `{dest}` ended: {e}");
                        break;
                    }
                }
            }
        })?;

        debug!("publisher connected to `{destination}` (hwm {high_water_mark})");
        Ok(Publisher {
            destination: destination.to_string(),
            tx,
        })
    }

    fn publish(&self, frame: Vec<u8>) -> Result<PublishOutcome, TransportError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(PublishOutcome::Sent),
            Err(TrySendError::Full(_)) => Ok(PublishOutcome::Busy),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::ChannelClosed {
                destination: self.destination.clone(),
            }),
        }
    }
}

/// Lazily populated transport state for one producer backend.
pub struct TransportEndpoint {
    config: TransportConfig,
    publishers: Mutex<HashMap<String, Publisher>>,
}

impl TransportEndpoint {
    pub fn new(config: TransportConfig) -> Self {
        TransportEndpoint {
            config,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a frame on the pooled publisher for `destination`, connecting
    /// it first if this is the first send. A dead publisher is removed so
    /// the next send re-establishes the connection.
    pub fn publish(
        &self,
        destination: &str,
        frame: Vec<u8>,
        tracker: &Arc<QueueTracker>,
    ) -> Result<PublishOutcome, TransportError> {
        let mut pool = self.publishers.lock().unwrap();
        if !pool.contains_key(destination) {
            let publisher = Publisher::connect(
                destination,
                Duration::from_millis(self.config.connect_ready_delay_ms),
                self.config.high_water_mark,
                Arc::clone(tracker),
            )?;
            pool.insert(destination.to_string(), publisher);
        }

        let outcome = pool
            .get(destination)
            .map(|p| p.publish(frame))
            .unwrap_or_else(|| {
                Err(TransportError::ChannelClosed {
                    destination: destination.to_string(),
                })
            });

        if matches!(outcome, Err(TransportError::ChannelClosed { .. })) {
            pool.remove(destination);
        }
        outcome
    }

    /// Blocking request/reply send on a fresh single-use connection. Waits
    /// for `expected` ack records or fails with `Timeout` at the deadline.
    pub fn request(
        &self,
        destination: &str,
        frame: &[u8],
        expected: usize,
    ) -> Result<Vec<AckMessage>, TransportError> {
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let deadline = Instant::now() + timeout;

        let mut stream =
            TcpStream::connect(destination).map_err(|source| TransportError::Connect {
                destination: destination.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        codec::write_frame(&mut stream, frame).map_err(|source| TransportError::Send {
            destination: destination.to_string(),
            source,
        })?;

        let mut acks = Vec::with_capacity(expected);
        while acks.len() < expected {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(destination, timeout));
            }
            stream
                .set_read_timeout(Some(deadline - now))
                .map_err(|source| TransportError::Send {
                    destination: destination.to_string(),
                    source,
                })?;

            match codec::read_frame(&mut stream) {
                Ok(Some(buf)) => match codec::decode(&buf) {
                    Ok(Envelope::Ack(ack)) => acks.push(ack),
                    Ok(Envelope::Batch(_)) => {
                        warn!("unexpected batch frame in reply from `{destination}`")
                    }
                    Err(e) => {
                        return Err(TransportError::Send {
                            destination: destination.to_string(),
                            source: io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
                        });
                    }
                },
                Ok(None) => {
                    return Err(TransportError::Send {
                        destination: destination.to_string(),
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed before all acks arrived",
                        ),
                    });
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(self.timeout_error(destination, timeout));
                }
                Err(source) => {
                    return Err(TransportError::Send {
                        destination: destination.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(acks)
    }

    /// Drop every pooled publisher. Writer threads drain frames already
    /// queued, then shut their sockets down.
    pub fn cleanup(&self) {
        let mut pool = self.publishers.lock().unwrap();
        for (destination, _) in pool.drain() {
            debug!("closed publisher for `{destination}`");
        }
    }

    fn timeout_error(&self, destination: &str, timeout: Duration) -> TransportError {
        TransportError::Timeout {
            destination: destination.to_string(),
            waited_ms: timeout.as_millis() as u64,
        }
    }

    /// Install a publisher whose writer never drains, so the channel fills
    /// after `high_water_mark` frames. Lets tests hit the drop path without
    /// depending on socket buffer sizes.
    #[cfg(test)]
    pub(crate) fn insert_stalled(&self, destination: &str, high_water_mark: usize) {
        let (tx, rx) = bounded::<Vec<u8>>(high_water_mark);
        thread::spawn(move || {
            let _keep = rx;
            loop {
                thread::park();
            }
        });
        self.publishers.lock().unwrap().insert(
            destination.to_string(),
            Publisher {
                destination: destination.to_string(),
                tx,
            },
        );
    }
}

impl Drop for TransportEndpoint {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn spawn_detached(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<(), TransportError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map(|_| ())
        .map_err(|source| TransportError::Connect {
            destination: name.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn endpoint(ready_delay_ms: u64) -> TransportEndpoint {
        TransportEndpoint::new(TransportConfig {
            connect_ready_delay_ms: ready_delay_ms,
            request_timeout_ms: 200,
            high_water_mark: 4,
            ..TransportConfig::default()
        })
    }

    #[test]
    fn transport_url_is_stable() {
        assert_eq!(
            transport_url("localhost", 5556, ChannelMode::Publish),
            "tcp://localhost:5556"
        );
    }

    #[test]
    fn publish_delivers_frames_to_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = listener.local_addr().unwrap().to_string();

        let endpoint = endpoint(0);
        let tracker = Arc::new(QueueTracker::default());
        let outcome = endpoint
            .publish(&destination, b"hello".to_vec(), &tracker)
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Sent);

        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = [0u8; 9];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &5u32.to_le_bytes());
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn stalled_publisher_reports_busy_past_the_high_water_mark() {
        let endpoint = endpoint(0);
        let tracker = Arc::new(QueueTracker::default());
        endpoint.insert_stalled("stall:1", 2);

        assert_eq!(
            endpoint.publish("stall:1", vec![1], &tracker).unwrap(),
            PublishOutcome::Sent
        );
        assert_eq!(
            endpoint.publish("stall:1", vec![2], &tracker).unwrap(),
            PublishOutcome::Sent
        );
        assert_eq!(
            endpoint.publish("stall:1", vec![3], &tracker).unwrap(),
            PublishOutcome::Busy
        );
    }

    #[test]
    fn connect_failure_is_loud() {
        let endpoint = endpoint(0);
        let tracker = Arc::new(QueueTracker::default());
        // Bind and drop a listener so the port is closed.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = endpoint
            .publish(&format!("127.0.0.1:{port}"), vec![0], &tracker)
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn request_times_out_without_a_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = listener.local_addr().unwrap().to_string();
        // Accept in the background but never reply.
        thread::spawn(move || {
            let _conn = listener.accept();
            thread::sleep(Duration::from_secs(2));
        });

        let endpoint = endpoint(0);
        let err = endpoint.request(&destination, b"ping", 1).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
