//! 传输层队列
//!
//! 入站队列是多写单读：任意线程都可以通过 `InboundSender` 推入帧，
//! 只有主线程在 tick 时读取。出站队列由传输实例独占，有容量上限，
//! 溢出时丢弃最旧的信封并记录警告。

use std::collections::VecDeque;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::bridge::Envelope;

/// 入站帧的线程安全写入端
#[derive(Clone)]
pub struct InboundSender {
    tx: Sender<String>,
}

impl InboundSender {
    /// 推入一帧；读取端已释放时返回 false
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.tx.send(frame.into()).is_ok()
    }
}

pub struct InboundQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> InboundSender {
        InboundSender {
            tx: self.tx.clone(),
        }
    }

    pub fn push(&self, frame: impl Into<String>) {
        // 本实例同时持有接收端，发送不会失败
        let _ = self.tx.send(frame.into());
    }

    /// 取出调用时刻已在队列中的全部帧
    ///
    /// 读取期间新到达的帧留到下一次，保证一次 tick 的工作量有界。
    pub fn drain(&self) -> Vec<String> {
        let pending = self.rx.len();
        let mut frames = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(_) => break,
            }
        }
        frames
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// 有界出站缓冲
pub struct OutboundQueue {
    queue: VecDeque<Envelope>,
    capacity: usize,
    evicted: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
        self.enforce_capacity();
    }

    /// 取出全部待发送信封
    pub fn take_all(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    /// 发送失败时把信封按原顺序放回队首
    pub fn requeue_front(&mut self, envelopes: Vec<Envelope>) {
        for envelope in envelopes.into_iter().rev() {
            self.queue.push_front(envelope);
        }
        self.enforce_capacity();
    }

    fn enforce_capacity(&mut self) {
        while self.queue.len() > self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                self.evicted += 1;
                tracing::warn!(
                    target: "transport",
                    "Outbound buffer full ({}), evicted oldest `{}` envelope (total evicted: {})",
                    self.capacity,
                    dropped.event,
                    self.evicted
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因溢出丢弃的信封总数
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_drain_is_bounded_by_snapshot() {
        let queue = InboundQueue::new();
        queue.push("a");
        queue.push("b");
        let frames = queue.drain();
        queue.push("c");
        assert_eq!(frames, vec!["a", "b"]);
        assert_eq!(queue.drain(), vec!["c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sender_from_other_thread() {
        let queue = InboundQueue::new();
        let sender = queue.sender();
        thread::spawn(move || {
            for i in 0..10 {
                sender.push(i.to_string());
            }
        })
        .join()
        .unwrap();
        let frames = queue.drain();
        assert_eq!(frames, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_outbound_evicts_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(Envelope::new("a"));
        queue.push(Envelope::new("b"));
        queue.push(Envelope::new("c"));
        assert_eq!(queue.evicted(), 1);
        let events: Vec<_> = queue.take_all().into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec!["b", "c"]);
    }

    #[test]
    fn test_requeue_front_restores_order() {
        let mut queue = OutboundQueue::new(8);
        queue.push(Envelope::new("c"));
        queue.requeue_front(vec![Envelope::new("a"), Envelope::new("b")]);
        let events: Vec<_> = queue.take_all().into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn prop_outbound_preserves_fifo(events in proptest::collection::vec("[a-z]{1,6}", 0..64)) {
            let mut queue = OutboundQueue::new(128);
            for event in &events {
                queue.push(Envelope::new(event.clone()));
            }
            let out: Vec<String> = queue.take_all().into_iter().map(|e| e.event).collect();
            prop_assert_eq!(out, events);
        }

        #[test]
        fn prop_inbound_preserves_fifo(frames in proptest::collection::vec(".{0,12}", 0..64)) {
            let queue = InboundQueue::new();
            for frame in &frames {
                queue.push(frame.clone());
            }
            prop_assert_eq!(queue.drain(), frames);
        }
    }
}
