//! Per-connection writer thread
//!
//! The tick thread never writes to a socket. Frames go into a bounded
//! channel and a dedicated thread performs the blocking writes, with a write
//! timeout so a stalled peer cannot pin that thread forever either. A peer
//! that stops reading fills its channel, which the caller sees as
//! `Offer::Full`.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Frames a connection may have queued before it counts as stalled
pub const WRITE_BACKLOG: usize = 256;
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// The backlog is full; the peer is not keeping up
    Full,
    /// The writer thread has exited after a write error
    Closed,
}

/// Handle to a connection's writer thread
///
/// Dropping every handle lets the thread finish the queued frames and exit.
#[derive(Clone)]
pub struct FrameWriter {
    frames: Sender<Arc<str>>,
}

impl FrameWriter {
    pub fn spawn(stream: TcpStream, peer: String, backlog: usize, timeout: Duration) -> std::io::Result<Self> {
        stream.set_write_timeout(Some(timeout))?;
        let (frames, queued) = bounded(backlog.max(1));
        thread::spawn(move || Self::write_loop(stream, peer, queued));
        Ok(Self { frames })
    }

    /// Queue a frame without blocking
    pub fn offer(&self, frame: &Arc<str>) -> Offer {
        match self.frames.try_send(Arc::clone(frame)) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    fn write_loop(stream: TcpStream, peer: String, queued: Receiver<Arc<str>>) {
        let mut out = &stream;
        for frame in queued.iter() {
            let written = out
                .write_all(frame.as_bytes())
                .and_then(|_| out.write_all(b"\n"))
                .and_then(|_| out.flush());
            if let Err(e) = written {
                tracing::warn!(target: "transport", "Write to {} failed: {}", peer, e);
                // Wakes the reader thread so the connection is torn down.
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
    }
}
