//! Concern plugin contract.
//!
//! A concern owns one command token. It is invoked for time-driven work once
//! per application tick, for inbound requests and replies carrying its
//! command, and for the delivery outcome of messages it composed.

use peerlink_types::{Command, Message};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NetworkError, Result};

/// Outbound priority bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Fast,
    Medium,
    Slow,
}

/// Messages composed during one tick, bucketed by priority.
#[derive(Debug, Default)]
pub struct Outbox {
    pub fast: Vec<Message>,
    pub medium: Vec<Message>,
    pub slow: Vec<Message>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, message: Message) {
        self.bucket(priority).push(message);
    }

    pub fn extend(&mut self, priority: Priority, messages: impl IntoIterator<Item = Message>) {
        self.bucket(priority).extend(messages);
    }

    pub fn len(&self) -> usize {
        self.fast.len() + self.medium.len() + self.slow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every message out, tagged with its bucket.
    pub fn drain(&mut self) -> impl Iterator<Item = (Priority, Message)> + '_ {
        let fast = self.fast.drain(..).map(|m| (Priority::Fast, m));
        let medium = self.medium.drain(..).map(|m| (Priority::Medium, m));
        let slow = self.slow.drain(..).map(|m| (Priority::Slow, m));
        fast.chain(medium).chain(slow)
    }

    fn bucket(&mut self, priority: Priority) -> &mut Vec<Message> {
        match priority {
            Priority::Fast => &mut self.fast,
            Priority::Medium => &mut self.medium,
            Priority::Slow => &mut self.slow,
        }
    }
}

/// What the sender should do with a message whose send attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Retry(Message),
    Dropped,
}

/// Reply produced by a handler, if any.
pub type Reply = Option<(Priority, Message)>;

pub trait Concern: Send + Sync {
    fn command(&self) -> Command;

    /// Scheduled work, run once per application tick.
    fn execute(&self, _now: Duration, _outbox: &mut Outbox) -> Result<()> {
        Ok(())
    }

    fn process_request(&self, message: &Message, now: Duration) -> Result<Reply>;

    fn process_reply(&self, message: &Message, now: Duration) -> Result<Reply>;

    fn message_sent(&self, _message: &Message) {}

    /// Default policy: retry until the deadline passes.
    fn send_failed(&self, message: Message, _error: &NetworkError) -> SendOutcome {
        SendOutcome::Retry(message)
    }

    fn message_dropped(&self, _message: &Message) {}
}

/// Concerns keyed by command. Built before the loops start, read-only after.
#[derive(Default, Clone)]
pub struct ConcernRegistry {
    concerns: HashMap<Command, Arc<dyn Concern>>,
}

impl ConcernRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `concern`, replacing any concern with the same command.
    pub fn register(&mut self, concern: Arc<dyn Concern>) -> Option<Arc<dyn Concern>> {
        self.concerns.insert(concern.command(), concern)
    }

    pub fn get(&self, command: &Command) -> Option<&Arc<dyn Concern>> {
        self.concerns.get(command)
    }

    /// Concern owning `message`: its handler when set, else its command.
    pub fn handler_for(&self, message: &Message) -> Option<&Arc<dyn Concern>> {
        self.get(message.handler.as_ref().unwrap_or(&message.command))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Concern>> {
        self.concerns.values()
    }

    pub fn len(&self) -> usize {
        self.concerns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concerns.is_empty()
    }
}

impl std::fmt::Debug for ConcernRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.concerns.keys()).finish()
    }
}
