//! Per-connection outbound frame queue.
//!
//! Request/response traffic must never be silently dropped, but PubSub push
//! fan-out to a slow subscriber must not be allowed to stall every publisher
//! behind it. A single bounded queue serves both: [`OutboundQueue::send`]
//! waits for space (backpressure), [`OutboundQueue::send_lossy`] drops the
//! oldest queued frame instead of blocking.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct OutboundQueue {
    capacity: usize,
    frames: Mutex<VecDeque<Vec<u8>>>,
    item_ready: Notify,
    space_available: Notify,
    closed: Mutex<bool>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            item_ready: Notify::new(),
            space_available: Notify::new(),
            closed: Mutex::new(false),
        }
    }

    /// Enqueues `frame`, waiting for space if the queue is full. Used for
    /// request replies, which must always reach the client.
    pub async fn send(&self, frame: Vec<u8>) {
        loop {
            {
                let mut frames = self.frames.lock().expect("outbound queue poisoned");
                if *self.closed.lock().expect("outbound queue poisoned") {
                    return;
                }
                if frames.len() < self.capacity {
                    frames.push_back(frame);
                    drop(frames);
                    self.item_ready.notify_one();
                    return;
                }
            }
            self.space_available.notified().await;
        }
    }

    /// Enqueues `frame`, dropping the oldest queued frame if full instead of
    /// blocking the caller. Used for PubSub push delivery.
    pub fn send_lossy(&self, frame: Vec<u8>) {
        let mut frames = self.frames.lock().expect("outbound queue poisoned");
        if *self.closed.lock().expect("outbound queue poisoned") {
            return;
        }
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
        drop(frames);
        self.item_ready.notify_one();
    }

    /// Waits for and removes the next queued frame. Returns `None` once the
    /// queue has been closed and drained.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut frames = self.frames.lock().expect("outbound queue poisoned");
                if let Some(frame) = frames.pop_front() {
                    drop(frames);
                    self.space_available.notify_one();
                    return Some(frame);
                }
                if *self.closed.lock().expect("outbound queue poisoned") {
                    return None;
                }
            }
            self.item_ready.notified().await;
        }
    }

    /// Marks the queue closed and wakes any pending `recv`/`send` callers.
    pub fn close(&self) {
        *self.closed.lock().expect("outbound queue poisoned") = true;
        self.item_ready.notify_waiters();
        self.space_available.notify_waiters();
    }
}
