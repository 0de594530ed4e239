//! Application loop: turns inbound traffic and scheduled work into outbound
//! traffic once per tick.

use peerlink_storage::PeerStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::concern::Outbox;
use crate::dispatcher::ConcernDispatcher;
use crate::error::Result;
use crate::inbox::Inbox;
use crate::peers::PeerTable;
use crate::router::Router;
use crate::sender::SendQueues;
use crate::service::{LoopControl, LoopWorker};

pub struct ApplicationLoop {
    peers: Arc<PeerTable>,
    inbox: Arc<Inbox>,
    queues: Arc<SendQueues>,
    dispatcher: ConcernDispatcher,
    router: Router,
    store: Arc<dyn PeerStore>,
    clock: Arc<dyn Clock>,
    /// Woken whenever outbound messages are queued.
    sender: Arc<LoopControl>,
    tick_interval: Duration,
    sync_db_interval: Duration,
    last_sync: Option<Duration>,
}

impl ApplicationLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peers: Arc<PeerTable>,
        inbox: Arc<Inbox>,
        queues: Arc<SendQueues>,
        dispatcher: ConcernDispatcher,
        router: Router,
        store: Arc<dyn PeerStore>,
        clock: Arc<dyn Clock>,
        sender: Arc<LoopControl>,
        tick_interval: Duration,
        sync_db_interval: Duration,
    ) -> Self {
        Self {
            peers,
            inbox,
            queues,
            dispatcher,
            router,
            store,
            clock,
            sender,
            tick_interval,
            sync_db_interval,
            last_sync: None,
        }
    }

    /// One tick with every comparison made against `now`.
    pub fn tick_at(&mut self, now: Duration) {
        if self
            .last_sync
            .map_or(true, |last| now >= last + self.sync_db_interval)
        {
            self.sync_peers(now);
            self.last_sync = Some(now);
        }

        let mut outbox = Outbox::new();
        self.dispatcher.execute_all(now, &mut outbox);
        self.dispatcher.run(&self.inbox, now, &mut outbox);
        self.router.run(&self.inbox, now, &mut outbox);
        self.deliver(outbox);
    }

    /// Messages for this instance go back to the inbox, the rest to the sender.
    fn deliver(&self, mut outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }
        let local = self.peers.local_id();
        let mut outbound = Outbox::new();
        for (priority, message) in outbox.drain() {
            if message.to == local {
                debug!(id = %message.id, command = %message.command, "Delivering locally");
                self.inbox.push_local(message);
            } else {
                outbound.push(priority, message);
            }
        }
        if !outbound.is_empty() {
            self.queues.submit(outbound);
            self.sender.wake();
        }
    }

    /// Save changed peers, then adopt peers added to the store by others.
    /// Storage failures are logged and retried on the next sync.
    pub fn sync_peers(&self, now: Duration) {
        let dirty = self.peers.take_dirty();
        let mut saved = 0;
        for peer in &dirty {
            match self.store.save_peer(peer) {
                Ok(db_id) => {
                    self.peers.set_db_id(&peer.id, db_id);
                    saved += 1;
                }
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "Failed to save peer");
                    self.peers.mark_dirty(&peer.id);
                }
            }
        }

        match self.store.load_peers() {
            Ok(stored) => {
                let added = self.peers.merge_stored(stored, now);
                if added > 0 {
                    info!(added, "Adopted peers from the directory");
                }
            }
            Err(e) => warn!(error = %e, "Failed to load peers"),
        }
        if saved > 0 {
            debug!(saved, "Peer directory synchronised");
        }
    }
}

impl LoopWorker for ApplicationLoop {
    fn name(&self) -> &'static str {
        "peerlink-app"
    }

    fn on_start(&mut self) -> Result<()> {
        let now = self.clock.now();
        match self.store.load_peers() {
            Ok(stored) => {
                let added = self.peers.merge_stored(stored, now);
                info!(peers = added, "Loaded peer directory");
            }
            Err(e) => warn!(error = %e, "Failed to load peer directory"),
        }
        self.last_sync = Some(now);
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.tick_at(now);
        Ok(())
    }

    fn idle(&self) -> Duration {
        self.tick_interval
    }

    fn on_stop(&mut self) {
        self.sync_peers(self.clock.now());
    }
}
