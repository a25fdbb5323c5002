//! The wish store task.
//!
//! [`WishStore::spawn`] starts one tokio task per group that owns the
//! [`WishBoard`] and serializes every mutation: history loads, change-feed
//! deliveries and local sends. Callers talk to it through a cloneable
//! [`WishStoreHandle`] and observe it through a `watch` channel of
//! [`BoardSnapshot`]s plus an `mpsc` channel of [`StoreNotification`]s.
//!
//! Network calls (history fetch, inserts, author name lookups) run on their
//! own tasks and report back through a completion channel, so feed events
//! and sends keep flowing while any of them is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use wanderlist_shared::constants::{MAX_WISH_LEN, UNKNOWN_SENDER};
use wanderlist_shared::{FeedEvent, GroupId, NewWish, UserId, Wish, WishId};

use crate::backend::{FeedSubscription, WishBackend};
use crate::board::{BoardChange, BoardEvent, BoardSnapshot, WishBoard};
use crate::config::ClientConfig;
use crate::error::{BackendError, WishError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Out-of-band events for the UI (toasts, placeholders).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StoreNotification {
    Loaded { count: usize },
    LoadFailed { reason: String },
    /// An insert was rejected and its optimistic entry removed.
    SendFailed {
        local_id: WishId,
        message: String,
        reason: String,
    },
    /// The change feed ended. It is not reopened automatically.
    FeedClosed,
}

/// Tuning knobs for a store task.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub command_capacity: usize,
    pub notify_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for StoreConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            command_capacity: config.command_capacity.max(1),
            notify_capacity: config.notify_capacity.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to a running store task.
#[derive(Clone)]
pub struct WishStoreHandle {
    group_id: GroupId,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<BoardSnapshot>,
}

impl WishStoreHandle {
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Fetch the group's history and merge it into the list.
    ///
    /// Resolves with the number of wishes in the snapshot. On failure the
    /// list is left as it was and a [`StoreNotification::LoadFailed`] is
    /// emitted.
    pub async fn load(&self) -> Result<usize, WishError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Load { reply }).await?;
        rx.await.map_err(|_| WishError::Closed)?
    }

    /// Post a wish.
    ///
    /// Resolves with the local id once the optimistic entry is visible; the
    /// insert itself completes in the background. A rejected insert rolls the
    /// entry back and emits [`StoreNotification::SendFailed`].
    pub async fn send(
        &self,
        user_id: UserId,
        message: impl Into<String>,
    ) -> Result<WishId, WishError> {
        let message = message.into();
        validate(&message)?;

        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            user_id,
            message,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WishError::Closed)?
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BoardSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the task and drop the change-feed subscription.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request(&self, command: Command) -> Result<(), WishError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WishError::Closed)
    }
}

fn validate(message: &str) -> Result<(), WishError> {
    if message.trim().is_empty() {
        return Err(WishError::EmptyMessage);
    }
    let len = message.chars().count();
    if len > MAX_WISH_LEN {
        return Err(WishError::TooLong {
            len,
            max: MAX_WISH_LEN,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Task internals
// ---------------------------------------------------------------------------

enum Command {
    Load {
        reply: oneshot::Sender<Result<usize, WishError>>,
    },
    Send {
        user_id: UserId,
        message: String,
        reply: oneshot::Sender<Result<WishId, WishError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

enum Completion {
    Loaded {
        result: Result<Vec<Wish>, BackendError>,
        reply: oneshot::Sender<Result<usize, WishError>>,
    },
    Inserted {
        local_id: WishId,
        message: String,
        result: Result<Wish, BackendError>,
    },
    Named {
        user_id: UserId,
        result: Result<String, BackendError>,
    },
}

/// Strictly increasing millisecond clock for optimistic ids.
#[derive(Debug, Default)]
struct LocalClock {
    last: i64,
}

impl LocalClock {
    fn next(&mut self) -> WishId {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

pub struct WishStore<B: WishBackend> {
    backend: Arc<B>,
    board: WishBoard,
    names: HashMap<UserId, String>,
    /// Name lookups in flight, with the feed rows waiting on them.
    lookups: HashMap<UserId, Vec<Wish>>,
    clock: LocalClock,
    snapshots: watch::Sender<BoardSnapshot>,
    notifications: mpsc::Sender<StoreNotification>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<B: WishBackend> WishStore<B> {
    /// Open the group's change feed and start the store task.
    ///
    /// Fails with [`WishError::Subscription`] if the feed cannot be opened.
    /// History is not fetched until [`WishStoreHandle::load`] is called.
    pub async fn spawn(
        backend: Arc<B>,
        group_id: GroupId,
        config: StoreConfig,
    ) -> Result<(WishStoreHandle, mpsc::Receiver<StoreNotification>), WishError> {
        let feed = backend
            .subscribe(group_id)
            .await
            .map_err(WishError::Subscription)?;

        let board = WishBoard::new(group_id);
        let (snapshots, snapshot_rx) = watch::channel(board.snapshot());
        let (commands, command_rx) = mpsc::channel(config.command_capacity);
        let (notifications, notification_rx) = mpsc::channel(config.notify_capacity);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let store = WishStore {
            backend,
            board,
            names: HashMap::new(),
            lookups: HashMap::new(),
            clock: LocalClock::default(),
            snapshots,
            notifications,
            completions_tx,
            completions_rx,
        };

        tokio::spawn(store.run(command_rx, feed));
        info!(group_id, "wish store started");

        let handle = WishStoreHandle {
            group_id,
            commands,
            snapshots: snapshot_rx,
        };
        Ok((handle, notification_rx))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, feed: FeedSubscription) {
        let group_id = self.board.group_id();
        let mut feed = Some(feed);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(Command::Load { reply }) => self.start_load(reply),
                    Some(Command::Send { user_id, message, reply }) => {
                        self.start_send(user_id, message, reply)
                    }
                    None => break,
                },

                event = next_event(&mut feed), if feed.is_some() => match event {
                    Some(event) => self.handle_feed_event(event),
                    None => {
                        warn!(group_id, "change feed closed");
                        feed = None;
                        self.notify(StoreNotification::FeedClosed);
                    }
                },

                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
            }
        }

        // Dropping the subscription unsubscribes from the feed.
        drop(feed);
        info!(group_id, "wish store stopped");
    }

    fn start_load(&mut self, reply: oneshot::Sender<Result<usize, WishError>>) {
        self.apply(BoardEvent::LoadStarted);
        let backend = Arc::clone(&self.backend);
        let done = self.completions_tx.clone();
        let group_id = self.board.group_id();
        tokio::spawn(async move {
            let result = backend.fetch_wishes(group_id).await;
            let _ = done.send(Completion::Loaded { result, reply });
        });
    }

    /// Show the optimistic entry, answer the caller, then issue the insert.
    fn start_send(
        &mut self,
        user_id: UserId,
        message: String,
        reply: oneshot::Sender<Result<WishId, WishError>>,
    ) {
        let group_id = self.board.group_id();
        let local_id = self.clock.next();
        let sender_name = match self.names.get(&user_id) {
            Some(name) => name.clone(),
            None => {
                self.lookup_name(user_id, None);
                UNKNOWN_SENDER.to_string()
            }
        };
        let placeholder =
            Wish::optimistic(local_id, group_id, user_id, sender_name, message.clone());
        self.apply(BoardEvent::SendStarted(placeholder));
        let _ = reply.send(Ok(local_id));

        let request = NewWish {
            group_id,
            user_id,
            message: message.clone(),
        };
        let backend = Arc::clone(&self.backend);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = backend.insert_wish(request).await;
            let _ = done.send(Completion::Inserted {
                local_id,
                message,
                result,
            });
        });
        debug!(local_id, user = %user_id, "optimistic wish shown, insert issued");
    }

    /// Apply a feed row at once when its author's name is known; otherwise
    /// park it until the lookup reports back.
    fn handle_feed_event(&mut self, event: FeedEvent) {
        let FeedEvent::Insert { mut record } = event;
        if self.board.has_seen(record.id) {
            debug!(wish_id = record.id, "duplicate feed delivery ignored");
            return;
        }
        if !record.sender_name.is_empty() {
            self.remember_name(record.user_id, &record.sender_name);
        } else if let Some(name) = self.names.get(&record.user_id) {
            record.sender_name = name.clone();
        } else {
            self.lookup_name(record.user_id, Some(record));
            return;
        }
        self.apply(BoardEvent::RemoteInsert(record));
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Loaded { result, reply } => match result {
                Ok(history) => {
                    let count = history.len();
                    for wish in &history {
                        if !wish.sender_name.is_empty() {
                            self.remember_name(wish.user_id, &wish.sender_name);
                        }
                    }
                    self.apply(BoardEvent::Loaded(history));
                    info!(group_id = self.board.group_id(), count, "history loaded");
                    self.notify(StoreNotification::Loaded { count });
                    let _ = reply.send(Ok(count));
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!(group_id = self.board.group_id(), error = %reason, "history load failed");
                    self.apply(BoardEvent::LoadFailed(reason.clone()));
                    self.notify(StoreNotification::LoadFailed { reason });
                    let _ = reply.send(Err(WishError::Fetch(e)));
                }
            },
            Completion::Inserted {
                local_id,
                message,
                result,
            } => match result {
                Ok(mut record) => {
                    if record.sender_name.is_empty() {
                        record.sender_name = self
                            .names
                            .get(&record.user_id)
                            .cloned()
                            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
                    } else {
                        self.remember_name(record.user_id, &record.sender_name);
                    }
                    debug!(local_id, wish_id = record.id, "insert accepted");
                    self.apply(BoardEvent::SendAccepted { local_id, record });
                }
                Err(e) => {
                    let reason = WishError::Send(e).to_string();
                    warn!(local_id, error = %reason, "insert rejected, rolling back");
                    self.apply(BoardEvent::SendFailed { local_id });
                    self.notify(StoreNotification::SendFailed {
                        local_id,
                        message,
                        reason,
                    });
                }
            },
            Completion::Named { user_id, result } => self.finish_lookup(user_id, result),
        }
    }

    /// Start a name lookup off the loop. Rows for an author already being
    /// looked up join the existing request.
    fn lookup_name(&mut self, user_id: UserId, waiting: Option<Wish>) {
        let in_flight = self.lookups.contains_key(&user_id);
        self.lookups.entry(user_id).or_default().extend(waiting);
        if in_flight {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = backend.display_name(user_id).await;
            let _ = done.send(Completion::Named { user_id, result });
        });
    }

    fn finish_lookup(&mut self, user_id: UserId, result: Result<String, BackendError>) {
        let waiting = self.lookups.remove(&user_id).unwrap_or_default();
        let name = match result {
            Ok(name) => {
                self.remember_name(user_id, &name);
                name
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "name lookup failed");
                UNKNOWN_SENDER.to_string()
            }
        };
        for mut record in waiting {
            record.sender_name = name.clone();
            self.apply(BoardEvent::RemoteInsert(record));
        }
    }

    /// Cache a name and show it on the author's pending placeholders.
    fn remember_name(&mut self, user_id: UserId, name: &str) {
        if self.names.get(&user_id).map(String::as_str) == Some(name) {
            return;
        }
        self.names.insert(user_id, name.to_string());
        self.apply(BoardEvent::AuthorNamed {
            user_id,
            name: name.to_string(),
        });
    }

    fn apply(&mut self, event: BoardEvent) {
        if self.board.apply(event) == BoardChange::Updated {
            self.snapshots.send_replace(self.board.snapshot());
        }
    }

    fn notify(&self, notification: StoreNotification) {
        if let Err(e) = self.notifications.try_send(notification) {
            warn!(error = %e, "notification dropped");
        }
    }
}

async fn next_event(feed: &mut Option<FeedSubscription>) -> Option<FeedEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => None,
    }
}
