//! The per-group wish list as a small state machine.
//!
//! [`WishBoard`] owns the ordered list of wishes for one group and the set of
//! confirmed ids it has already ingested. It is mutated only through
//! [`BoardEvent`]s, so every transition of a wish (`Optimistic -> Confirmed`,
//! `Optimistic -> Removed`) happens in one place.
//!
//! Invariants maintained after every event:
//! - the list is sorted by `created_at`, ties in arrival order;
//! - a confirmed id appears at most once;
//! - a feed row may remove one optimistic placeholder with the same author
//!   and text before its insert reply arrives;
//! - every placeholder is gone once its own send has completed, accepted or
//!   failed, so identical back-to-back sends never leave one behind.
//!
//! A send can fail on the client after the server committed it (a request
//! timeout). Its row then arrives as an ordinary confirmed entry; the board
//! cannot tell it apart from a twin's row, so a failure only ever removes the
//! failed send's own placeholder.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, trace, warn};

use wanderlist_shared::{GroupId, UserId, Wish, WishId};

/// Load state of a board, used by the UI to pick between the list, a spinner
/// and an error placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum BoardStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum BoardEvent {
    LoadStarted,
    /// History snapshot, oldest first.
    Loaded(Vec<Wish>),
    LoadFailed(String),
    /// A confirmed row delivered by the change feed, name already resolved.
    RemoteInsert(Wish),
    /// A local send; the wish is the optimistic placeholder.
    SendStarted(Wish),
    /// The insert behind `local_id` was rejected.
    SendFailed { local_id: WishId },
    /// The insert behind `local_id` was committed as `record`.
    SendAccepted { local_id: WishId, record: Wish },
    /// An author's display name became known; fills in their placeholders.
    AuthorNamed { user_id: UserId, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardChange {
    Unchanged,
    Updated,
}

impl BoardChange {
    fn from_bool(changed: bool) -> Self {
        if changed {
            BoardChange::Updated
        } else {
            BoardChange::Unchanged
        }
    }
}

/// Point-in-time copy of a board, published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub group_id: GroupId,
    pub wishes: Vec<Wish>,
    pub status: BoardStatus,
    /// Sends whose insert has not completed yet.
    pub pending: usize,
}

impl BoardSnapshot {
    pub fn optimistic_count(&self) -> usize {
        self.wishes.iter().filter(|w| w.is_optimistic).count()
    }
}

#[derive(Debug)]
pub struct WishBoard {
    group_id: GroupId,
    wishes: Vec<Wish>,
    /// Confirmed ids already ingested.
    seen: HashSet<WishId>,
    /// Confirmed ids that removed a placeholder when they arrived.
    consumed: HashSet<WishId>,
    /// Local ids of in-flight sends.
    pending: HashSet<WishId>,
    status: BoardStatus,
}

impl WishBoard {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            wishes: Vec::new(),
            seen: HashSet::new(),
            consumed: HashSet::new(),
            pending: HashSet::new(),
            status: BoardStatus::Idle,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn wishes(&self) -> &[Wish] {
        &self.wishes
    }

    pub fn status(&self) -> &BoardStatus {
        &self.status
    }

    pub fn has_seen(&self, id: WishId) -> bool {
        self.seen.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            group_id: self.group_id,
            wishes: self.wishes.clone(),
            status: self.status.clone(),
            pending: self.pending.len(),
        }
    }

    pub fn apply(&mut self, event: BoardEvent) -> BoardChange {
        match event {
            BoardEvent::LoadStarted => self.set_status(BoardStatus::Loading),
            BoardEvent::Loaded(snapshot) => self.on_loaded(snapshot),
            BoardEvent::LoadFailed(reason) => self.set_status(BoardStatus::Failed(reason)),
            BoardEvent::RemoteInsert(record) => self.on_remote_insert(record),
            BoardEvent::SendStarted(placeholder) => self.on_send_started(placeholder),
            BoardEvent::SendFailed { local_id } => self.on_send_failed(local_id),
            BoardEvent::SendAccepted { local_id, record } => self.on_send_accepted(local_id, record),
            BoardEvent::AuthorNamed { user_id, name } => self.on_author_named(user_id, &name),
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn set_status(&mut self, status: BoardStatus) -> BoardChange {
        let changed = self.status != status;
        self.status = status;
        BoardChange::from_bool(changed)
    }

    /// Merge a history snapshot. Rows already delivered by the feed and
    /// placeholders of in-flight sends survive; the snapshot cannot know
    /// about either.
    fn on_loaded(&mut self, snapshot: Vec<Wish>) -> BoardChange {
        let mut added = 0usize;
        for wish in snapshot {
            if !self.belongs(&wish) {
                continue;
            }
            if self.seen.insert(wish.id) {
                self.insert_confirmed(wish);
                added += 1;
            }
        }
        debug!(group_id = self.group_id, added, total = self.wishes.len(), "history merged");
        self.status = BoardStatus::Ready;
        BoardChange::Updated
    }

    fn on_remote_insert(&mut self, record: Wish) -> BoardChange {
        if !self.belongs(&record) {
            return BoardChange::Unchanged;
        }
        if !self.seen.insert(record.id) {
            trace!(wish_id = record.id, "duplicate feed delivery ignored");
            return BoardChange::Unchanged;
        }
        if self.remove_oldest_twin(&record) {
            self.consumed.insert(record.id);
        }
        self.insert_confirmed(record);
        BoardChange::Updated
    }

    fn on_send_started(&mut self, mut placeholder: Wish) -> BoardChange {
        if !self.belongs(&placeholder) {
            return BoardChange::Unchanged;
        }
        placeholder.is_optimistic = true;
        self.pending.insert(placeholder.id);
        self.insert_sorted(placeholder);
        BoardChange::Updated
    }

    /// Drop the failed send's own placeholder. If a feed row already took
    /// it, that row's sender clears its own placeholder when its insert
    /// returns.
    fn on_send_failed(&mut self, local_id: WishId) -> BoardChange {
        if !self.pending.remove(&local_id) {
            return BoardChange::Unchanged;
        }
        BoardChange::from_bool(self.remove_optimistic(local_id))
    }

    /// Reconcile from the row the insert returned. Covers change feeds that
    /// never echo a client's own writes.
    fn on_send_accepted(&mut self, local_id: WishId, record: Wish) -> BoardChange {
        self.pending.remove(&local_id);
        if !self.belongs(&record) {
            return BoardChange::from_bool(self.remove_optimistic(local_id));
        }

        if self.seen.contains(&record.id) {
            if self.consumed.contains(&record.id) {
                // The feed echo already removed a placeholder for this row,
                // possibly a twin's; this send's own one may still be up.
                return BoardChange::from_bool(self.remove_optimistic(local_id));
            }
            // Row arrived with the history snapshot; its placeholder is stale.
            let removed = self.remove_optimistic(local_id) || self.remove_oldest_twin(&record);
            if removed {
                self.consumed.insert(record.id);
            }
            return BoardChange::from_bool(removed);
        }

        self.seen.insert(record.id);
        if self.take_placeholder(&record, local_id) {
            self.consumed.insert(record.id);
        }
        self.insert_confirmed(record);
        BoardChange::Updated
    }

    fn on_author_named(&mut self, user_id: UserId, name: &str) -> BoardChange {
        let mut changed = false;
        for wish in self
            .wishes
            .iter_mut()
            .filter(|w| w.is_optimistic && w.user_id == user_id && w.sender_name != name)
        {
            wish.sender_name = name.to_string();
            changed = true;
        }
        BoardChange::from_bool(changed)
    }

    // ------------------------------------------------------------------
    // List helpers
    // ------------------------------------------------------------------

    fn belongs(&self, wish: &Wish) -> bool {
        if wish.group_id == self.group_id {
            return true;
        }
        warn!(
            expected = self.group_id,
            got = wish.group_id,
            wish_id = wish.id,
            "wish for another group ignored"
        );
        false
    }

    fn insert_confirmed(&mut self, mut wish: Wish) {
        wish.is_optimistic = false;
        self.insert_sorted(wish);
    }

    fn insert_sorted(&mut self, wish: Wish) {
        let at = self
            .wishes
            .partition_point(|w| w.created_at <= wish.created_at);
        self.wishes.insert(at, wish);
    }

    /// Remove the placeholder of send `local_id`, or if a feed row already
    /// took it, the oldest one with the same author and text.
    fn take_placeholder(&mut self, record: &Wish, local_id: WishId) -> bool {
        self.remove_optimistic(local_id) || self.remove_oldest_twin(record)
    }

    fn remove_optimistic(&mut self, local_id: WishId) -> bool {
        match self
            .wishes
            .iter()
            .position(|w| w.is_optimistic && w.id == local_id)
        {
            Some(pos) => {
                self.wishes.remove(pos);
                true
            }
            None => false,
        }
    }

    fn remove_oldest_twin(&mut self, record: &Wish) -> bool {
        match self
            .wishes
            .iter()
            .position(|w| w.is_optimistic && w.same_content(record))
        {
            Some(pos) => {
                self.wishes.remove(pos);
                true
            }
            None => false,
        }
    }
}
