//! Mesh configuration.

use peerlink_types::PeerId;
use std::time::Duration;

/// Multiple of the heartbeat interval after which a silent peer is unreachable.
pub const UNRESPONSIVE_FACTOR: u32 = 10;

/// Tunables for the delivery substrate. All times are on the mesh clock.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Base interval between heartbeats to a peer
    pub heart_beat_interval: Duration,
    /// Added to the interval after every unanswered heartbeat. The back-off
    /// is linear: 4s, 6s, 8s, then capped by `heart_beat_max_interval`.
    pub heart_beat_slow_down: Duration,
    /// Upper bound for the backed-off interval
    pub heart_beat_max_interval: Duration,
    /// Silence after which a connected peer becomes unreachable
    pub unresponsive_threshold: Duration,
    /// Silence after which a peer is given up on
    pub no_connection_threshold: Duration,
    /// Minimum spacing between peer directory syncs
    pub sync_db_interval: Duration,
    /// Minimum spacing between discovery requests for the same peer
    pub ask_around_interval: Duration,
    /// Lifetime given to freshly composed messages
    pub default_ttl: Duration,
    /// Frames read from the transport per receiver tick
    pub receive_cap: usize,
    /// Inbound messages dispatched per application tick, requests and
    /// replies together
    pub process_cap: usize,
    /// Messages routed per application tick
    pub route_cap: usize,
    /// Proxy used for peers without a known path
    pub default_route: Option<PeerId>,
    /// Idle wait of the application loop between ticks
    pub tick_interval: Duration,
    /// Receiver poll timeout
    pub poll_timeout: Duration,
    /// Idle wait of the sender between ticks
    pub send_idle: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        let heart_beat_interval = Duration::from_secs(4);
        Self {
            heart_beat_interval,
            heart_beat_slow_down: Duration::from_secs(2),
            heart_beat_max_interval: Duration::from_secs(10),
            unresponsive_threshold: heart_beat_interval * UNRESPONSIVE_FACTOR,
            no_connection_threshold: Duration::from_secs(240),
            sync_db_interval: Duration::from_secs(10),
            ask_around_interval: Duration::from_secs(60),
            default_ttl: Duration::from_secs(30),
            receive_cap: 10,
            process_cap: 12,
            route_cap: 12,
            default_route: None,
            tick_interval: Duration::from_millis(250),
            poll_timeout: Duration::from_millis(100),
            send_idle: Duration::from_millis(50),
        }
    }
}

impl MeshConfig {
    /// Change the heartbeat interval, keeping the unresponsive threshold at
    /// [`UNRESPONSIVE_FACTOR`] times the interval.
    pub fn with_heart_beat_interval(mut self, interval: Duration) -> Self {
        self.heart_beat_interval = interval;
        self.unresponsive_threshold = interval * UNRESPONSIVE_FACTOR;
        self
    }

    pub fn with_default_route(mut self, route: PeerId) -> Self {
        self.default_route = Some(route);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = MeshConfig::default();
        assert_eq!(config.unresponsive_threshold, Duration::from_secs(40));
        assert_eq!(config.no_connection_threshold, Duration::from_secs(240));
        assert_eq!(config.receive_cap, 10);
        assert_eq!(config.process_cap, 12);
        assert!(config.default_route.is_none());
    }

    #[test]
    fn unresponsive_threshold_tracks_interval() {
        let config = MeshConfig::default().with_heart_beat_interval(Duration::from_secs(1));
        assert_eq!(config.unresponsive_threshold, Duration::from_secs(10));
    }
}
