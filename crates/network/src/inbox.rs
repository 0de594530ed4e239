//! Classified inbound messages shared by the receiver and the application loop.

use parking_lot::Mutex;
use peerlink_types::Message;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct Queues {
    requests: VecDeque<Message>,
    replies: VecDeque<Message>,
    routes: VecDeque<Message>,
}

/// Receiver output: requests and replies addressed to this instance, and
/// messages that still need routing.
#[derive(Debug, Default)]
pub struct Inbox {
    queues: Mutex<Queues>,
}

/// One receiver tick's worth of classified messages.
#[derive(Debug, Default)]
pub struct InboundBatch {
    pub requests: Vec<Message>,
    pub replies: Vec<Message>,
    pub routes: Vec<Message>,
}

impl InboundBatch {
    pub fn len(&self) -> usize {
        self.requests.len() + self.replies.len() + self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn take(queue: &mut VecDeque<Message>, max: usize) -> Vec<Message> {
    let n = max.min(queue.len());
    queue.drain(..n).collect()
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a batch; all three queues change under one lock.
    pub fn publish(&self, batch: InboundBatch) {
        let mut queues = self.queues.lock();
        queues.requests.extend(batch.requests);
        queues.replies.extend(batch.replies);
        queues.routes.extend(batch.routes);
    }

    /// Queue a message composed for the local instance.
    pub fn push_local(&self, message: Message) {
        let mut queues = self.queues.lock();
        if message.is_reply {
            queues.replies.push_back(message);
        } else {
            queues.requests.push_back(message);
        }
    }

    pub fn push_route(&self, message: Message) {
        self.queues.lock().routes.push_back(message);
    }

    pub fn take_requests(&self, max: usize) -> Vec<Message> {
        take(&mut self.queues.lock().requests, max)
    }

    pub fn take_replies(&self, max: usize) -> Vec<Message> {
        take(&mut self.queues.lock().replies, max)
    }

    pub fn take_routes(&self, max: usize) -> Vec<Message> {
        take(&mut self.queues.lock().routes, max)
    }

    /// Return unresolved messages to the route queue for the next tick.
    pub fn requeue_routes(&self, messages: Vec<Message>) {
        self.queues.lock().routes.extend(messages);
    }

    /// Pending (requests, replies, routes).
    pub fn lens(&self) -> (usize, usize, usize) {
        let queues = self.queues.lock();
        (queues.requests.len(), queues.replies.len(), queues.routes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.lens() == (0, 0, 0)
    }
}
