use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Delivery substrate counters, shared by the loop threads.
#[derive(Debug)]
pub struct NetworkMetrics {
    // Message counters
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    send_failures: AtomicU64,
    retries: AtomicU64,
    messages_dropped: AtomicU64,
    decode_errors: AtomicU64,
    handler_errors: AtomicU64,

    // Byte counters
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Routing counters
    messages_routed: AtomicU64,
    route_drops: AtomicU64,
    discovery_requests: AtomicU64,

    // Connection counters
    connections_opened: AtomicU64,
    connections_failed: AtomicU64,

    start_time: Instant,
}

impl NetworkMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            route_drops: AtomicU64::new(0),
            discovery_requests: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_message_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_message_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_drop(&self) {
        self.route_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery_requests(&self, count: usize) {
        self.discovery_requests
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkMetricsSnapshot {
        NetworkMetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            route_drops: self.route_drops.load(Ordering::Relaxed),
            discovery_requests: self.discovery_requests.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of network metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub send_failures: u64,
    pub retries: u64,
    pub messages_dropped: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_routed: u64,
    pub route_drops: u64,
    pub discovery_requests: u64,
    pub connections_opened: u64,
    pub connections_failed: u64,
    pub uptime_seconds: u64,
}

impl NetworkMetricsSnapshot {
    /// Share of send attempts that went through first or on retry
    pub fn success_rate(&self) -> f64 {
        let total = self.messages_sent + self.send_failures;
        if total == 0 {
            return 1.0;
        }
        self.messages_sent as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = NetworkMetrics::new();

        metrics.record_message_sent(100);
        metrics.record_message_received(200);
        metrics.record_connection_opened();
        metrics.record_discovery_requests(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.bytes_received, 200);
        assert_eq!(snapshot.connections_opened, 1);
        assert_eq!(snapshot.discovery_requests, 3);
    }

    #[test]
    fn test_success_rate() {
        let metrics = NetworkMetrics::new();
        assert_eq!(metrics.snapshot().success_rate(), 1.0);

        for _ in 0..3 {
            metrics.record_message_sent(10);
        }
        metrics.record_send_failure();
        assert!((metrics.snapshot().success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = NetworkMetrics::new();
        metrics.record_route_drop();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["route_drops"], 1);
        assert!(json.get("uptime_seconds").is_some());
    }
}
