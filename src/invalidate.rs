use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::BucketKey;

const CHANNEL_CAPACITY: usize = 256;

/// Invalidation sink for the read-through cache layer. One broadcast
/// channel per bucket; a key is published after every successful delta
/// or reconcile so cache entries can be dropped.
pub struct InvalidationHub {
    channels: DashMap<BucketKey, broadcast::Sender<BucketKey>>,
}

impl Default for InvalidationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    /// Subscribe to invalidations for a bucket. Creates the channel if needed.
    pub fn subscribe(&self, key: BucketKey) -> broadcast::Receiver<BucketKey> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an invalidation. No-op if nobody is listening.
    pub fn publish(&self, key: &BucketKey) {
        metrics::counter!(crate::observability::INVALIDATIONS_PUBLISHED_TOTAL).increment(1);
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(*key);
        }
    }

    /// Remove a channel (e.g. when the bucket is purged).
    pub fn remove(&self, key: &BucketKey) {
        self.channels.remove(key);
    }
}
