use peerlink_network::{
    ConcernDispatcher, ConcernRegistry, HeartbeatProtocol, InboundBatch, Inbox, MeshConfig,
    NetworkMetrics, Outbox, PeerTable, HEARTBEAT,
};
use peerlink_types::{Message, PeerState};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

struct Node {
    peers: Arc<PeerTable>,
    inbox: Inbox,
    dispatcher: ConcernDispatcher,
}

impl Node {
    fn new(config: MeshConfig) -> Self {
        let peers = Arc::new(PeerTable::new(Uuid::new_v4(), config.heart_beat_interval));
        let mut registry = ConcernRegistry::new();
        registry.register(Arc::new(HeartbeatProtocol::new(peers.clone(), config.clone())));
        let dispatcher = ConcernDispatcher::new(
            Arc::new(registry),
            Arc::new(NetworkMetrics::new()),
            config.process_cap,
        );
        Self {
            peers,
            inbox: Inbox::new(),
            dispatcher,
        }
    }

    fn tick(&self, now: Duration) -> Outbox {
        let mut outbox = Outbox::new();
        self.dispatcher.execute_all(now, &mut outbox);
        self.dispatcher.run(&self.inbox, now, &mut outbox);
        outbox
    }
}

#[test]
fn silent_peer_goes_unreachable_then_no_connection() {
    let config = MeshConfig::default();
    let node = Node::new(config.clone());
    let remote = Uuid::new_v4();
    let heard_at = secs(100);

    let mut reply = Message::request(remote, node.peers.local_id(), HEARTBEAT, vec![], secs(130));
    reply.is_reply = true;
    reply.previous_hop = Some(remote);
    node.inbox.publish(InboundBatch {
        replies: vec![reply],
        ..Default::default()
    });

    let outbox = node.tick(heard_at);
    assert!(outbox.is_empty(), "replies are not answered");
    let peer = node.peers.get(&remote).expect("peer created from reply");
    assert_eq!(peer.state(), PeerState::Connected);
    assert_eq!(peer.last_heart_beat_time, heard_at);

    let mut unreachable_at = None;
    let mut no_connection_at = None;
    let mut probes_after_give_up = 0;
    for t in 101..=500 {
        let now = secs(t);
        let outbox = node.tick(now);
        let probes = outbox.fast.iter().filter(|m| m.to == remote).count();
        if no_connection_at.is_some() {
            probes_after_give_up += probes;
        }

        let peer = node.peers.get(&remote).unwrap();
        match peer.state() {
            PeerState::Unreachable if unreachable_at.is_none() => unreachable_at = Some(now),
            PeerState::NoConnection if no_connection_at.is_none() => {
                assert!(!peer.does_heart_beat);
                no_connection_at = Some(now);
            }
            _ => {}
        }
    }

    let unreachable_at = unreachable_at.expect("peer became unreachable");
    let no_connection_at = no_connection_at.expect("peer lost its connection");
    // transitions happen at the first probe past each threshold
    assert!(unreachable_at > heard_at + config.unresponsive_threshold);
    assert!(unreachable_at <= heard_at + config.unresponsive_threshold + config.heart_beat_max_interval);
    assert!(no_connection_at > heard_at + config.no_connection_threshold);
    assert!(no_connection_at <= heard_at + config.no_connection_threshold + config.heart_beat_max_interval);
    assert_eq!(probes_after_give_up, 0);
}

#[test]
fn heartbeat_exchange_between_two_tables() {
    let config = MeshConfig::default();
    let a = Node::new(config.clone());
    let b = Node::new(config);
    let (a_id, b_id) = (a.peers.local_id(), b.peers.local_id());
    a.peers.upsert_with(b_id, secs(0), |_| ());

    // a probes b
    let mut outbox = a.tick(secs(0));
    assert_eq!(outbox.fast.len(), 1);
    let mut request = outbox.fast.remove(0);
    request.previous_hop = Some(a_id);
    b.inbox.publish(InboundBatch {
        requests: vec![request],
        ..Default::default()
    });

    // b learns about a and answers
    let mut outbox = b.tick(secs(1));
    assert_eq!(b.peers.get(&a_id).unwrap().state(), PeerState::Connected);
    let mut reply = outbox
        .fast
        .iter()
        .position(|m| m.is_reply)
        .map(|i| outbox.fast.remove(i))
        .expect("heartbeat reply");
    reply.previous_hop = Some(b_id);
    a.inbox.publish(InboundBatch {
        replies: vec![reply],
        ..Default::default()
    });

    a.tick(secs(2));
    let peer = a.peers.get(&b_id).unwrap();
    assert_eq!(peer.state(), PeerState::Connected);
    assert_eq!(peer.last_heart_beat_time, secs(2));
    assert_eq!(peer.next_heart_beat_time, secs(6));
}
