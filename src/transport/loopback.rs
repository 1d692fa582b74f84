//! In-process transport
//!
//! The control side holds a `ControlEndpoint`; frames cross through crossbeam
//! channels, so the endpoint may live on another thread.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::queue::{InboundQueue, InboundSender, OutboundQueue};
use super::BridgeTransport;
use crate::bridge::envelope::{encode_frames, parse_frame};
use crate::bridge::Envelope;
use crate::core::{TransportError, TransportResult};

pub struct LoopbackTransport {
    inbound: InboundQueue,
    outbound: OutboundQueue,
    to_control: Sender<String>,
    from_host: Receiver<String>,
    batch: bool,
    started: bool,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(4096, true)
    }
}

impl LoopbackTransport {
    pub fn new(capacity: usize, batch: bool) -> Self {
        let (to_control, from_host) = unbounded();
        Self {
            inbound: InboundQueue::new(),
            outbound: OutboundQueue::new(capacity),
            to_control,
            from_host,
            batch,
            started: false,
        }
    }

    /// Handle for the control side
    pub fn endpoint(&self) -> ControlEndpoint {
        ControlEndpoint {
            to_host: self.inbound.sender(),
            from_host: self.from_host.clone(),
        }
    }

    pub fn evicted(&self) -> u64 {
        self.outbound.evicted()
    }
}

impl BridgeTransport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn start(&mut self) -> TransportResult<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn enqueue_outbound(&mut self, envelope: Envelope) {
        self.outbound.push(envelope);
    }

    fn flush(&mut self) -> TransportResult<usize> {
        if !self.started || self.outbound.is_empty() {
            return Ok(0);
        }
        let envelopes = self.outbound.take_all();
        let frames = match encode_frames(&envelopes, self.batch) {
            Ok(frames) => frames,
            Err(e) => {
                self.outbound.requeue_front(envelopes);
                return Err(TransportError::Serialization(e.to_string()));
            }
        };
        for frame in frames {
            // The transport owns a receiver clone, so the channel never disconnects.
            let _ = self.to_control.send(frame);
        }
        Ok(envelopes.len())
    }

    fn drain_inbound(&mut self) -> Vec<String> {
        if !self.started {
            return Vec::new();
        }
        self.inbound.drain()
    }

    fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

/// Control-side end of a `LoopbackTransport`
#[derive(Clone)]
pub struct ControlEndpoint {
    to_host: InboundSender,
    from_host: Receiver<String>,
}

impl ControlEndpoint {
    pub fn send(&self, envelope: &Envelope) -> TransportResult<()> {
        let text = envelope
            .to_json_string()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.send_raw(text)
    }

    /// Send a raw frame (single envelope, batch array or garbage)
    pub fn send_raw(&self, frame: impl Into<String>) -> TransportResult<()> {
        if self.to_host.push(frame) {
            Ok(())
        } else {
            Err(TransportError::Connection("host side dropped".into()))
        }
    }

    /// Raw frames delivered so far
    pub fn receive_raw(&self) -> Vec<String> {
        self.from_host.try_iter().collect()
    }

    /// Envelopes delivered so far, batches flattened in order
    pub fn receive(&self) -> Vec<Envelope> {
        self.receive_raw()
            .iter()
            .flat_map(|frame| parse_frame(frame))
            .filter_map(Result::ok)
            .collect()
    }
}
