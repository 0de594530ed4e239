//! Outbound priority queues.
//!
//! All three queues share one contract and differ only in how much a single
//! `dequeue` call hands out:
//! - [`FastQueue`]: everything queued (latency-sensitive traffic)
//! - [`RegularQueue`]: the oldest message for each distinct destination
//! - [`SlowQueue`]: at most one message (background traffic)
//!
//! Selected messages always come out in enqueue order.

use parking_lot::Mutex;
use peerlink_types::{Message, PeerId};
use std::collections::{HashSet, VecDeque};

pub trait MessageQueue: Send + Sync {
    fn enqueue(&self, message: Message) {
        self.enqueue_many(vec![message]);
    }

    fn enqueue_many(&self, messages: Vec<Message>);

    /// Remove and return the messages this queue's policy selects.
    fn dequeue(&self) -> Vec<Message>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain-all queue.
#[derive(Debug, Default)]
pub struct FastQueue {
    inner: Mutex<VecDeque<Message>>,
}

impl FastQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for FastQueue {
    fn enqueue_many(&self, messages: Vec<Message>) {
        self.inner.lock().extend(messages);
    }

    fn dequeue(&self) -> Vec<Message> {
        self.inner.lock().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Per-destination fair queue ("medium" priority).
#[derive(Debug, Default)]
pub struct RegularQueue {
    inner: Mutex<VecDeque<Message>>,
}

impl RegularQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for RegularQueue {
    fn enqueue_many(&self, messages: Vec<Message>) {
        self.inner.lock().extend(messages);
    }

    fn dequeue(&self) -> Vec<Message> {
        let mut queue = self.inner.lock();
        let mut seen: HashSet<PeerId> = HashSet::new();
        let mut taken = Vec::new();
        let mut rest = VecDeque::with_capacity(queue.len());
        for message in queue.drain(..) {
            if seen.insert(message.to) {
                taken.push(message);
            } else {
                rest.push_back(message);
            }
        }
        *queue = rest;
        taken
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Globally throttled queue: one message per call.
#[derive(Debug, Default)]
pub struct SlowQueue {
    inner: Mutex<VecDeque<Message>>,
}

impl SlowQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for SlowQueue {
    fn enqueue_many(&self, messages: Vec<Message>) {
        self.inner.lock().extend(messages);
    }

    fn dequeue(&self) -> Vec<Message> {
        self.inner.lock().pop_front().into_iter().collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
