//! External relay transport
//!
//! Connects out to a relay server over TCP and exchanges newline-delimited
//! frames. Connecting, reading and reconnecting all happen on a background
//! link thread, so `start` and `flush` never wait on the network. A lost or
//! refused connection is retried once per reconnect interval; outbound
//! envelopes stay buffered meanwhile.

use std::io::{BufRead, BufReader};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::queue::{InboundQueue, InboundSender, OutboundQueue};
use super::writer::{FrameWriter, Offer, WRITE_BACKLOG, WRITE_TIMEOUT};
use super::BridgeTransport;
use crate::bridge::envelope::encode_frames;
use crate::bridge::Envelope;
use crate::core::{TransportError, TransportResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(20);

/// An established relay connection
struct Link {
    stream: TcpStream,
    writer: FrameWriter,
}

/// State shared with the link thread of one `start`..`stop` run
#[derive(Clone)]
struct Session {
    running: Arc<AtomicBool>,
    link: Arc<Mutex<Option<Link>>>,
}

impl Session {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            link: Arc::new(Mutex::new(None)),
        }
    }

    fn writer(&self) -> Option<FrameWriter> {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|link| link.writer.clone())
    }

    fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = link.stream.shutdown(Shutdown::Both);
        }
    }
}

pub struct RelayTransport {
    address: String,
    reconnect: Duration,
    inbound: InboundQueue,
    outbound: OutboundQueue,
    session: Option<Session>,
    batch: bool,
}

impl RelayTransport {
    pub fn new(address: impl Into<String>, reconnect_ms: u64, capacity: usize, batch: bool) -> Self {
        Self {
            address: address.into(),
            reconnect: Duration::from_millis(reconnect_ms),
            inbound: InboundQueue::new(),
            outbound: OutboundQueue::new(capacity),
            session: None,
            batch,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.writer().is_some())
    }

    /// Connect, read until the relay goes away, then retry (runs on its own thread)
    fn run_link(address: String, reconnect: Duration, session: Session, inbound: InboundSender) {
        while session.running.load(Ordering::SeqCst) {
            match Self::open(&address) {
                Ok((reader, link)) => {
                    {
                        let mut slot = session.link.lock().unwrap_or_else(|e| e.into_inner());
                        if !session.running.load(Ordering::SeqCst) {
                            let _ = link.stream.shutdown(Shutdown::Both);
                            return;
                        }
                        *slot = Some(link);
                    }
                    tracing::info!(target: "transport", "Connected to relay {}", address);
                    Self::read_relay(reader, &inbound);
                    if let Some(link) = session.link.lock().unwrap_or_else(|e| e.into_inner()).take() {
                        let _ = link.stream.shutdown(Shutdown::Both);
                    }
                    tracing::info!(target: "transport", "Relay connection closed");
                }
                Err(e) => {
                    tracing::warn!(target: "transport", "Relay {} unavailable: {}", address, e);
                }
            }

            let retry_at = Instant::now() + reconnect;
            while session.running.load(Ordering::SeqCst) && Instant::now() < retry_at {
                thread::sleep(STOP_POLL.min(reconnect));
            }
        }
    }

    fn open(address: &str) -> std::io::Result<(TcpStream, Link)> {
        let mut last_error = None;
        for target in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&target, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    let reader = stream.try_clone()?;
                    let writer = FrameWriter::spawn(
                        stream.try_clone()?,
                        address.to_string(),
                        WRITE_BACKLOG,
                        WRITE_TIMEOUT,
                    )?;
                    return Ok((reader, Link { stream, writer }));
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable)))
    }

    fn read_relay(stream: TcpStream, inbound: &InboundSender) {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => {
                    if !inbound.push(line) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(target: "transport", "Relay read error: {}", e);
                    break;
                }
            }
        }
    }
}

impl BridgeTransport for RelayTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    /// Starting never fails on an unreachable relay; the link thread keeps retrying.
    fn start(&mut self) -> TransportResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = Session::new();
        let address = self.address.clone();
        let reconnect = self.reconnect;
        let link_session = session.clone();
        let inbound = self.inbound.sender();
        thread::spawn(move || Self::run_link(address, reconnect, link_session, inbound));
        self.session = Some(session);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn is_started(&self) -> bool {
        self.session.is_some()
    }

    fn enqueue_outbound(&mut self, envelope: Envelope) {
        self.outbound.push(envelope);
    }

    fn flush(&mut self) -> TransportResult<usize> {
        if self.outbound.is_empty() {
            return Ok(0);
        }
        let Some(writer) = self.session.as_ref().and_then(Session::writer) else {
            return Ok(0);
        };

        let mut envelopes = self.outbound.take_all();
        let frames: Vec<Arc<str>> = match encode_frames(&envelopes, self.batch) {
            Ok(frames) => frames.into_iter().map(Arc::from).collect(),
            Err(e) => {
                self.outbound.requeue_front(envelopes);
                return Err(TransportError::Serialization(e.to_string()));
            }
        };

        let mut accepted = 0;
        for frame in &frames {
            match writer.offer(frame) {
                Offer::Accepted => accepted += 1,
                Offer::Full => {
                    // Batch mode has a single frame, so nothing went out.
                    let sent = if self.batch { 0 } else { accepted };
                    self.outbound.requeue_front(envelopes.split_off(sent));
                    tracing::debug!(target: "transport", "Relay {} backlog full, holding {} envelopes", self.address, self.outbound.len());
                    return Ok(sent);
                }
                Offer::Closed => {
                    let sent = if self.batch { 0 } else { accepted };
                    self.outbound.requeue_front(envelopes.split_off(sent));
                    return Err(TransportError::Send(format!("relay {}: connection closed", self.address)));
                }
            }
        }
        Ok(envelopes.len())
    }

    fn drain_inbound(&mut self) -> Vec<String> {
        self.inbound.drain()
    }

    fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_exchange_with_relay() {
        let relay = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = relay.local_addr().unwrap().to_string();

        let mut transport = RelayTransport::new(address, 10, 16, true);
        transport.enqueue_outbound(Envelope::new("hello"));
        transport.start().unwrap();

        let (peer, _) = relay.accept().unwrap();
        assert!(wait_until(|| transport.is_connected()));
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut writer = peer.try_clone().unwrap();
        writer.write_all(b"[{\"event\":\"a\"},{\"event\":\"b\"}]\n").unwrap();

        assert_eq!(transport.flush().unwrap(), 1);
        let mut line = String::new();
        BufReader::new(peer).read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), r#"[{"event":"hello"}]"#);

        let mut frames = Vec::new();
        assert!(wait_until(|| {
            frames.extend(transport.drain_inbound());
            !frames.is_empty()
        }));
        assert_eq!(frames, vec![r#"[{"event":"a"},{"event":"b"}]"#]);
    }

    #[test]
    fn test_buffers_while_relay_is_down() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut transport = RelayTransport::new(address, 60_000, 16, true);
        transport.start().unwrap();
        assert!(!transport.is_connected());
        transport.enqueue_outbound(Envelope::new("queued"));
        assert_eq!(transport.flush().unwrap(), 0);
        assert_eq!(transport.pending_outbound(), 1);
    }

    #[test]
    fn test_unreachable_relay_does_not_block_tick_calls() {
        // Non-routable, so a connect attempt hangs until it times out.
        let mut transport = RelayTransport::new("10.255.255.1:9", 60_000, 16, false);
        let start = Instant::now();
        transport.start().unwrap();
        transport.enqueue_outbound(Envelope::new("queued"));
        assert_eq!(transport.flush().unwrap(), 0);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(transport.pending_outbound(), 1);
        transport.stop();
        assert!(!transport.is_started());
    }

    #[test]
    fn test_reconnects_after_relay_drops() {
        let relay = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = relay.local_addr().unwrap().to_string();
        let mut transport = RelayTransport::new(address, 10, 16, false);
        transport.start().unwrap();

        let (first, _) = relay.accept().unwrap();
        assert!(wait_until(|| transport.is_connected()));
        drop(first);
        assert!(wait_until(|| !transport.is_connected()));

        let (second, _) = relay.accept().unwrap();
        assert!(wait_until(|| transport.is_connected()));
        second.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        transport.enqueue_outbound(Envelope::new("again"));
        assert_eq!(transport.flush().unwrap(), 1);
        let mut line = String::new();
        BufReader::new(second).read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), r#"{"event":"again"}"#);
    }
}
