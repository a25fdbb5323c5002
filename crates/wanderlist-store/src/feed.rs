//! In-process change feed.
//!
//! Every committed wish is published to a per-group
//! [`tokio::sync::broadcast`] channel. Channels are created lazily on first
//! subscribe or publish and pruned once nobody listens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use wanderlist_shared::constants::DEFAULT_FEED_CAPACITY;
use wanderlist_shared::types::group_topic;
use wanderlist_shared::{FeedEvent, GroupId, Wish};

type Channels = HashMap<GroupId, broadcast::Sender<FeedEvent>>;

/// Cloneable handle to the per-group broadcast channels.
#[derive(Clone)]
pub struct ChangeFeed {
    channels: Arc<Mutex<Channels>>,
    capacity: usize,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Receive every wish committed to `group_id` from now on.
    pub fn subscribe(&self, group_id: GroupId) -> broadcast::Receiver<FeedEvent> {
        let mut channels = self.lock();
        let sender = channels
            .entry(group_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(topic = %group_topic(group_id), "feed subscriber added");
        sender.subscribe()
    }

    /// Publish a committed wish. Returns how many subscribers received it.
    pub fn publish(&self, wish: &Wish) -> usize {
        let channels = self.lock();
        let Some(sender) = channels.get(&wish.group_id) else {
            trace!(group_id = wish.group_id, "no feed subscribers");
            return 0;
        };
        let event = FeedEvent::Insert {
            record: wish.clone(),
        };
        // A send error only means every receiver is gone.
        sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers for a group.
    pub fn subscriber_count(&self, group_id: GroupId) -> usize {
        self.lock()
            .get(&group_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels that have no receivers left.
    pub fn prune(&self) -> usize {
        let mut channels = self.lock();
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wanderlist_shared::UserId;

    fn wish(id: i64, group_id: GroupId) -> Wish {
        Wish {
            id,
            group_id,
            user_id: UserId::new(),
            sender_name: "Ana".into(),
            message: "beach?".into(),
            created_at: Utc::now(),
            is_optimistic: false,
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_the_matching_group() {
        let feed = ChangeFeed::new(8);
        let mut seven = feed.subscribe(7);
        let mut eight = feed.subscribe(8);

        assert_eq!(feed.publish(&wish(1, 7)), 1);

        let FeedEvent::Insert { record } = seven.recv().await.unwrap();
        assert_eq!(record.id, 1);
        assert!(eight.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let feed = ChangeFeed::default();
        assert_eq!(feed.publish(&wish(1, 3)), 0);
        assert_eq!(feed.subscriber_count(3), 0);
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let feed = ChangeFeed::new(4);
        let rx = feed.subscribe(1);
        let _kept = feed.subscribe(2);
        assert_eq!(feed.subscriber_count(1), 1);

        drop(rx);

        assert_eq!(feed.prune(), 1);
        assert_eq!(feed.subscriber_count(2), 1);
    }
}
