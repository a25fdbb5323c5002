//! In-process backend over [`wanderlist_store`].
//!
//! Shares the database handle and change feed with whatever else runs in the
//! process (the HTTP server, or other stores in tests).

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use wanderlist_shared::{GroupId, NewWish, UserId, Wish};
use wanderlist_store::{ChangeFeed, Database};

use crate::backend::{FeedSubscription, WishBackend};
use crate::error::BackendError;

/// Buffer between the broadcast receiver and the store.
const FORWARD_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Mutex<Database>>,
    feed: ChangeFeed,
}

impl LocalBackend {
    pub fn new(db: Arc<Mutex<Database>>, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Shared database handle, for seeding users and groups.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, BackendError> {
        self.db
            .lock()
            .map_err(|e| BackendError::Task(format!("Lock poisoned: {e}")))
    }
}

#[async_trait]
impl WishBackend for LocalBackend {
    async fn fetch_wishes(&self, group_id: GroupId) -> Result<Vec<Wish>, BackendError> {
        Ok(self.db()?.list_wishes_for_group(group_id)?)
    }

    async fn insert_wish(&self, wish: NewWish) -> Result<Wish, BackendError> {
        let stored = self.db()?.insert_wish(&wish)?;
        // Publish only after the row is committed and the lock released.
        let delivered = self.feed.publish(&stored);
        debug!(wish_id = stored.id, delivered, "wish published to feed");
        Ok(stored)
    }

    async fn subscribe(&self, group_id: GroupId) -> Result<FeedSubscription, BackendError> {
        let mut rx = self.feed.subscribe(group_id);
        let (tx, events) = mpsc::channel(FORWARD_CAPACITY);

        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(group_id, skipped, "local feed lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(group_id, "local feed pump stopped");
        });

        Ok(FeedSubscription::new(events, pump))
    }

    async fn display_name(&self, user_id: UserId) -> Result<String, BackendError> {
        Ok(self.db()?.display_name(user_id)?)
    }
}

/// Convenience for wiring a fresh in-memory backend.
pub fn in_memory() -> Result<LocalBackend, BackendError> {
    let db = Database::open_in_memory()?;
    Ok(LocalBackend::new(
        Arc::new(Mutex::new(db)),
        ChangeFeed::default(),
    ))
}
