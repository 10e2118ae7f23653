//! Subscriber broadcast hub
//!
//! Holds the live subscriber set and fans each snapshot out. Every
//! subscriber owns a bounded channel whose receiving end is drained by
//! its connection task; a snapshot is serialized once and pushed into
//! every channel. Subscribers whose channel is gone are removed after
//! the publish pass completes, never mid-iteration. New subscribers see
//! only snapshots published after they join.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SUBSCRIBER_BUFFER: usize = 16;

/// Fan-out hub for snapshot delivery.
pub struct BroadcastHub {
    subscribers: DashMap<u64, mpsc::Sender<String>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber; returns its id and the channel its
    /// connection task drains.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.insert(id, tx);
        debug!("subscriber {} joined ({} total)", id, self.subscribers.len());
        (id, rx)
    }

    /// Drop a subscriber on disconnect.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            debug!("subscriber {} left ({} total)", id, self.subscribers.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Serialize the snapshot once and attempt delivery to every current
    /// subscriber. Returns the number of successful deliveries.
    ///
    /// A closed channel marks the subscriber dead; dead subscribers are
    /// removed after the iteration. A full channel means the subscriber
    /// is lagging: the snapshot is dropped for it (the next cycle brings
    /// a fresh one) but its membership is kept.
    pub fn publish<T: Serialize>(&self, snapshot: &T) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        let payload = match serde_json::to_string(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("snapshot serialization failed: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("subscriber {} lagging; snapshot skipped", entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
        delivered
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
