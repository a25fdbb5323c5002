//! The persistence contract the wish store runs against.
//!
//! A backend answers four questions: the history of a group, whether an
//! insert was accepted, which rows are being inserted right now, and what a
//! user is called.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wanderlist_shared::{FeedEvent, GroupId, NewWish, UserId, Wish};

use crate::error::BackendError;

#[async_trait]
pub trait WishBackend: Send + Sync + 'static {
    /// All wishes of a group, oldest first, with `sender_name` filled in.
    async fn fetch_wishes(&self, group_id: GroupId) -> Result<Vec<Wish>, BackendError>;

    /// Store a wish and return the committed row.
    async fn insert_wish(&self, wish: NewWish) -> Result<Wish, BackendError>;

    /// Open a live feed of rows inserted into `group_id`.
    ///
    /// Delivery is at-least-once; consumers dedupe by id.
    async fn subscribe(&self, group_id: GroupId) -> Result<FeedSubscription, BackendError>;

    /// Resolve an author's display name.
    async fn display_name(&self, user_id: UserId) -> Result<String, BackendError>;
}

/// A live change-feed subscription.
///
/// Events arrive on an internal channel fed by a pump task. Dropping the
/// subscription stops the pump, which closes the underlying channel or socket.
pub struct FeedSubscription {
    events: mpsc::Receiver<FeedEvent>,
    pump: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<FeedEvent>, pump: JoinHandle<()>) -> Self {
        Self {
            events,
            pump: Some(pump),
        }
    }

    /// A subscription fed directly by the caller, without a pump task.
    pub fn from_channel(events: mpsc::Receiver<FeedEvent>) -> Self {
        Self { events, pump: None }
    }

    /// Next event, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("pumped", &self.pump.is_some())
            .finish()
    }
}
