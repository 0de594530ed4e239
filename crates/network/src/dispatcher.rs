//! Demultiplexes inbound requests and replies to their concerns.

use peerlink_types::Message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::concern::{ConcernRegistry, Outbox};
use crate::error::{NetworkError, Result};
use crate::inbox::Inbox;
use crate::metrics::NetworkMetrics;

#[derive(Debug)]
pub struct ConcernDispatcher {
    registry: Arc<ConcernRegistry>,
    metrics: Arc<NetworkMetrics>,
    process_cap: usize,
}

impl ConcernDispatcher {
    pub fn new(registry: Arc<ConcernRegistry>, metrics: Arc<NetworkMetrics>, process_cap: usize) -> Self {
        Self {
            registry,
            metrics,
            process_cap,
        }
    }

    /// Handle up to `process_cap` inbound messages, requests first, collecting
    /// replies into `outbox`. Excess stays queued.
    pub fn run(&self, inbox: &Inbox, now: Duration, outbox: &mut Outbox) {
        let requests = inbox.take_requests(self.process_cap);
        let budget = self.process_cap - requests.len();
        for message in requests {
            self.dispatch(message, now, outbox, false);
        }
        if budget == 0 {
            return;
        }
        for message in inbox.take_replies(budget) {
            self.dispatch(message, now, outbox, true);
        }
    }

    /// Hand one inbound message to its concern.
    pub fn dispatch(&self, mut message: Message, now: Duration, outbox: &mut Outbox, reply: bool) {
        let Some(concern) = self.registry.get(&message.command) else {
            warn!(command = %message.command, source = %message.source, "Discarding message with unknown command");
            return;
        };
        message.handler = Some(message.command);

        let result = contain(|| {
            if reply {
                concern.process_reply(&message, now)
            } else {
                concern.process_request(&message, now)
            }
        });

        match result {
            Ok(Some((priority, response))) => {
                debug!(command = %message.command, to = %response.to, ?priority, "Concern replied");
                outbox.push(priority, response);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_handler_error();
                warn!(error = %e, message = ?message, "Concern handler failed");
            }
        }
    }

    /// Run every concern's scheduled work. A failing concern does not stop the others.
    pub fn execute_all(&self, now: Duration, outbox: &mut Outbox) {
        for concern in self.registry.iter() {
            if let Err(e) = contain(|| concern.execute(now, outbox)) {
                self.metrics.record_handler_error();
                warn!(command = %concern.command(), error = %e, "Concern execute failed");
            }
        }
    }
}

/// Run handler code, turning a panic into an error.
fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(NetworkError::Concern(format!("handler panicked: {}", reason)))
    })
}
