//! TCP 服务端传输
//!
//! 控制端以 TCP 连接接入，每行一个 JSON 帧（单个信封或信封数组）。
//! 每个客户端一个读取线程，读到的行直接推入入站队列；出站帧在 `flush`
//! 时交给每个客户端的写线程，tick 线程本身从不阻塞在套接字上。积压写满
//! 的慢客户端会被断开。没有客户端时出站信封保留在缓冲中。

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::queue::{InboundQueue, InboundSender, OutboundQueue};
use super::writer::{FrameWriter, Offer, WRITE_BACKLOG, WRITE_TIMEOUT};
use super::BridgeTransport;
use crate::bridge::envelope::encode_frames;
use crate::bridge::Envelope;
use crate::core::{TransportError, TransportResult};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// 已连接的控制端
struct Client {
    address: SocketAddr,
    stream: TcpStream,
    writer: FrameWriter,
}

type Clients = Arc<Mutex<HashMap<u64, Client>>>;

pub struct SocketTransport {
    address: String,
    max_connections: usize,
    inbound: InboundQueue,
    outbound: OutboundQueue,
    clients: Clients,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
    write_backlog: usize,
    batch: bool,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>, max_connections: usize, capacity: usize, batch: bool) -> Self {
        Self {
            address: address.into(),
            max_connections: max_connections.max(1),
            inbound: InboundQueue::new(),
            outbound: OutboundQueue::new(capacity),
            clients: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_thread: None,
            write_backlog: WRITE_BACKLOG,
            batch,
        }
    }

    /// 每个客户端允许积压的帧数，超过即视为慢客户端并断开
    pub fn with_write_backlog(mut self, frames: usize) -> Self {
        self.write_backlog = frames.max(1);
        self
    }

    /// 实际监听地址（端口 0 时由系统分配）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 接受连接（在独立线程中运行）
    fn accept_connections(
        listener: TcpListener,
        clients: Clients,
        running: Arc<AtomicBool>,
        inbound: InboundSender,
        max_connections: usize,
        write_backlog: usize,
    ) {
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, address)) => {
                    let mut guard = clients.lock().unwrap_or_else(|e| e.into_inner());
                    if guard.len() >= max_connections {
                        tracing::warn!(target: "transport", "Rejecting {}: connection limit {} reached", address, max_connections);
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!(target: "transport", "Failed to configure {}: {}", address, e);
                        continue;
                    }
                    let halves = stream.try_clone().and_then(|reader| {
                        let writer = FrameWriter::spawn(
                            stream.try_clone()?,
                            address.to_string(),
                            write_backlog,
                            WRITE_TIMEOUT,
                        )?;
                        Ok((reader, writer))
                    });
                    let (reader, writer) = match halves {
                        Ok(halves) => halves,
                        Err(e) => {
                            tracing::warn!(target: "transport", "Failed to set up stream for {}: {}", address, e);
                            continue;
                        }
                    };
                    let client_id = rand::random::<u64>();
                    guard.insert(client_id, Client { address, stream, writer });
                    drop(guard);
                    tracing::info!(target: "transport", "Client {} connected from {}", client_id, address);

                    let clients = Arc::clone(&clients);
                    let inbound = inbound.clone();
                    thread::spawn(move || Self::read_client(client_id, reader, clients, inbound));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!(target: "transport", "Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
    }

    /// 逐行读取客户端数据（在独立线程中运行）
    fn read_client(client_id: u64, stream: TcpStream, clients: Clients, inbound: InboundSender) {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => {
                    if !inbound.push(line) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(target: "transport", "Client {} read error: {}", client_id, e);
                    break;
                }
            }
        }
        clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&client_id);
        tracing::info!(target: "transport", "Client {} disconnected", client_id);
    }
}

impl BridgeTransport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn start(&mut self) -> TransportResult<()> {
        if self.is_started() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.address)
            .map_err(|e| TransportError::Bind(format!("{}: {}", self.address, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind(format!("Failed to set nonblocking: {}", e)))?;
        self.local_addr = listener.local_addr().ok();
        self.running.store(true, Ordering::SeqCst);

        let clients = Arc::clone(&self.clients);
        let running = Arc::clone(&self.running);
        let inbound = self.inbound.sender();
        let max_connections = self.max_connections;
        let write_backlog = self.write_backlog;
        self.accept_thread = Some(thread::spawn(move || {
            Self::accept_connections(listener, clients, running, inbound, max_connections, write_backlog);
        }));

        tracing::info!(target: "transport", "Socket transport listening on {:?}", self.local_addr);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut clients) = self.clients.lock() {
            for client in clients.values() {
                let _ = client.stream.shutdown(Shutdown::Both);
            }
            clients.clear();
        }
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        tracing::info!(target: "transport", "Socket transport stopped");
    }

    fn is_started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn enqueue_outbound(&mut self, envelope: Envelope) {
        self.outbound.push(envelope);
    }

    fn flush(&mut self) -> TransportResult<usize> {
        if !self.is_started() || self.outbound.is_empty() {
            return Ok(0);
        }
        let mut clients = self
            .clients
            .lock()
            .map_err(|e| TransportError::Poisoned(e.to_string()))?;
        if clients.is_empty() {
            return Ok(0);
        }

        let envelopes = self.outbound.take_all();
        let frames: Vec<Arc<str>> = match encode_frames(&envelopes, self.batch) {
            Ok(frames) => frames.into_iter().map(Arc::from).collect(),
            Err(e) => {
                self.outbound.requeue_front(envelopes);
                return Err(TransportError::Serialization(e.to_string()));
            }
        };

        let mut failed = Vec::new();
        for (client_id, client) in clients.iter() {
            for frame in &frames {
                match client.writer.offer(frame) {
                    Offer::Accepted => {}
                    refused => {
                        tracing::warn!(target: "transport", "Dropping client {} ({}): writer {:?}", client_id, client.address, refused);
                        failed.push(*client_id);
                        break;
                    }
                }
            }
        }
        let delivered_to_any = failed.len() < clients.len();
        for client_id in failed {
            if let Some(client) = clients.remove(&client_id) {
                let _ = client.stream.shutdown(Shutdown::Both);
            }
        }

        if delivered_to_any {
            Ok(envelopes.len())
        } else {
            self.outbound.requeue_front(envelopes);
            Err(TransportError::Send("no client accepted the batch".into()))
        }
    }

    fn drain_inbound(&mut self) -> Vec<String> {
        self.inbound.drain()
    }

    fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

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
    fn test_round_trip_over_tcp() {
        let mut transport = SocketTransport::new("127.0.0.1:0", 4, 64, false);
        transport.enqueue_outbound(Envelope::new("hello"));
        transport.start().unwrap();
        let address = transport.local_addr().unwrap();

        let client = TcpStream::connect(address).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        assert!(wait_until(|| transport.client_count() == 1));

        let mut writer = client.try_clone().unwrap();
        writer.write_all(b"{\"event\":\"ping\",\"id\":\"a\"}\n\n").unwrap();
        let mut frames = Vec::new();
        assert!(wait_until(|| {
            frames.extend(transport.drain_inbound());
            !frames.is_empty()
        }));
        assert_eq!(frames, vec![r#"{"event":"ping","id":"a"}"#]);

        assert_eq!(transport.flush().unwrap(), 1);
        let mut line = String::new();
        BufReader::new(client).read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), r#"{"event":"hello"}"#);

        transport.stop();
        assert!(!transport.is_started());
    }

    #[test]
    fn test_buffers_without_clients() {
        let mut transport = SocketTransport::new("127.0.0.1:0", 4, 64, true);
        transport.start().unwrap();
        transport.enqueue_outbound(Envelope::new("a"));
        assert_eq!(transport.flush().unwrap(), 0);
        assert_eq!(transport.pending_outbound(), 1);
    }

    #[test]
    fn test_stalled_client_does_not_block_flush() {
        let mut transport = SocketTransport::new("127.0.0.1:0", 4, 64, false).with_write_backlog(1);
        transport.start().unwrap();
        let address = transport.local_addr().unwrap();

        // Connected but never reads.
        let _client = TcpStream::connect(address).unwrap();
        assert!(wait_until(|| transport.client_count() == 1));

        let payload = "x".repeat(1 << 20);
        let start = Instant::now();
        let mut flushes = 0;
        while transport.client_count() > 0 && flushes < 200 {
            let before = Instant::now();
            transport.enqueue_outbound(Envelope::new("bulk").with_data(serde_json::json!(payload.as_str())));
            let _ = transport.flush();
            assert!(before.elapsed() < Duration::from_secs(1));
            flushes += 1;
        }
        assert_eq!(transport.client_count(), 0);
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let mut transport = SocketTransport::new(address, 1, 8, true);
        assert!(matches!(transport.start(), Err(TransportError::Bind(_))));
    }
}
