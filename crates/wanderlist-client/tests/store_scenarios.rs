use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};

use wanderlist_client::local;
use wanderlist_client::{
    BackendError, BoardSnapshot, BoardStatus, FeedSubscription, StoreConfig, StoreNotification,
    WishBackend, WishError, WishStore, WishStoreHandle,
};
use wanderlist_shared::constants::UNKNOWN_SENDER;
use wanderlist_shared::{FeedEvent, GroupId, NewWish, UserId, Wish};

const WAIT: Duration = Duration::from_secs(2);

async fn wait_for(
    handle: &WishStoreHandle,
    pred: impl Fn(&BoardSnapshot) -> bool,
) -> BoardSnapshot {
    let mut rx = handle.watch();
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("store closed");
        }
    })
    .await
    .expect("timed out waiting for the board")
}

async fn next_notification(rx: &mut mpsc::Receiver<StoreNotification>) -> StoreNotification {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

struct Scripted {
    group_id: GroupId,
    history: Mutex<Option<Vec<Wish>>>,
    feed: Mutex<Option<mpsc::Sender<FeedEvent>>>,
    names: HashMap<UserId, String>,
    next_id: AtomicI64,
    echo_inserts: AtomicBool,
    fail_inserts: AtomicBool,
    fail_subscribe: bool,
    gate: Option<Arc<Semaphore>>,
    name_gate: Option<Arc<Semaphore>>,
    name_calls: AtomicUsize,
}

impl Scripted {
    fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            history: Mutex::new(Some(Vec::new())),
            feed: Mutex::new(None),
            names: HashMap::new(),
            next_id: AtomicI64::new(100),
            echo_inserts: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_subscribe: false,
            gate: None,
            name_gate: None,
            name_calls: AtomicUsize::new(0),
        }
    }

    fn confirmed(&self, id: i64, user_id: UserId, message: &str) -> Wish {
        Wish {
            id,
            group_id: self.group_id,
            user_id,
            sender_name: String::new(),
            message: message.into(),
            created_at: Utc::now(),
            is_optimistic: false,
        }
    }

    async fn push(&self, record: Wish) {
        let sender = self.feed.lock().unwrap().clone().expect("not subscribed");
        sender.send(FeedEvent::Insert { record }).await.unwrap();
    }

    fn close_feed(&self) {
        self.feed.lock().unwrap().take();
    }
}

#[async_trait]
impl WishBackend for Scripted {
    async fn fetch_wishes(&self, _group_id: GroupId) -> Result<Vec<Wish>, BackendError> {
        self.history
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BackendError::Status {
                status: 503,
                message: "history unavailable".into(),
            })
    }

    async fn insert_wish(&self, wish: NewWish) -> Result<Wish, BackendError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                message: "insert rejected".into(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = self.confirmed(id, wish.user_id, &wish.message);
        if self.echo_inserts.load(Ordering::SeqCst) {
            self.push(record.clone()).await;
        }
        Ok(record)
    }

    async fn subscribe(&self, _group_id: GroupId) -> Result<FeedSubscription, BackendError> {
        if self.fail_subscribe {
            return Err(BackendError::Task("feed refused".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(FeedSubscription::from_channel(rx))
    }

    async fn display_name(&self, user_id: UserId) -> Result<String, BackendError> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.name_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.names
            .get(&user_id)
            .cloned()
            .ok_or_else(|| BackendError::Status {
                status: 404,
                message: "user not found".into(),
            })
    }
}

async fn spawn_scripted(
    backend: Scripted,
) -> (
    Arc<Scripted>,
    WishStoreHandle,
    mpsc::Receiver<StoreNotification>,
) {
    let backend = Arc::new(backend);
    let group_id = backend.group_id;
    let (handle, notifications) =
        WishStore::spawn(Arc::clone(&backend), group_id, StoreConfig::default())
            .await
            .unwrap();
    (backend, handle, notifications)
}

// ---------------------------------------------------------------------------
// Scenarios against the in-process backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn group_conversation_end_to_end() {
    let backend = Arc::new(local::in_memory().unwrap());
    let (group, ana, bea, cy) = {
        let db = backend.database();
        let mut db = db.lock().unwrap();
        let ana = db.upsert_user(UserId::new(), "Ana").unwrap().id;
        let bea = db.upsert_user(UserId::new(), "Bea").unwrap().id;
        let cy = db.upsert_user(UserId::new(), "Cy").unwrap().id;
        let group = db.create_group("Algarve", ana).unwrap().id;
        db.add_member(group, bea).unwrap();
        db.insert_wish(&NewWish {
            group_id: group,
            user_id: ana,
            message: "beach?".into(),
        })
        .unwrap();
        (group, ana, bea, cy)
    };

    let (store, mut notifications) =
        WishStore::spawn(Arc::clone(&backend), group, StoreConfig::default())
            .await
            .unwrap();

    // 1. history
    assert_eq!(store.load().await.unwrap(), 1);
    assert_eq!(
        next_notification(&mut notifications).await,
        StoreNotification::Loaded { count: 1 }
    );
    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, BoardStatus::Ready);
    assert_eq!(snapshot.wishes.len(), 1);
    assert_eq!(snapshot.wishes[0].sender_name, "Ana");
    assert_eq!(snapshot.wishes[0].user_id, ana);

    // 2 + 3. Bea's send shows at once, then settles as one confirmed entry.
    store.send(bea, "yes!").await.unwrap();
    assert_eq!(store.snapshot().wishes.len(), 2);
    let settled = wait_for(&store, |s| s.pending == 0 && s.optimistic_count() == 0).await;
    assert_eq!(settled.wishes.len(), 2);
    let yes = &settled.wishes[1];
    assert_eq!((yes.message.as_str(), yes.sender_name.as_str()), ("yes!", "Bea"));
    assert!(!yes.is_optimistic);

    // 4. the feed echo and the insert reply both landed; still one entry
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.snapshot().wishes.len(), 2);

    // 5. Cy is not a member: the insert is rejected and rolled back.
    let local_id = store.send(cy, "hi").await.unwrap();
    match next_notification(&mut notifications).await {
        StoreNotification::SendFailed {
            local_id: failed,
            message,
            ..
        } => {
            assert_eq!(failed, local_id);
            assert_eq!(message, "hi");
        }
        other => panic!("unexpected notification {other:?}"),
    }
    let after = wait_for(&store, |s| s.pending == 0).await;
    assert_eq!(after.wishes.len(), 2);
    assert!(after.wishes.iter().all(|w| w.message != "hi"));

    store.close().await;
}

#[tokio::test]
async fn two_members_see_each_other_live() {
    let backend = Arc::new(local::in_memory().unwrap());
    let (group, ana, bea) = {
        let db = backend.database();
        let mut db = db.lock().unwrap();
        let ana = db.upsert_user(UserId::new(), "Ana").unwrap().id;
        let bea = db.upsert_user(UserId::new(), "Bea").unwrap().id;
        let group = db.create_group("Kyoto", ana).unwrap().id;
        db.add_member(group, bea).unwrap();
        (group, ana, bea)
    };

    let (ana_store, _ana_notes) =
        WishStore::spawn(Arc::clone(&backend), group, StoreConfig::default())
            .await
            .unwrap();
    let (bea_store, _bea_notes) =
        WishStore::spawn(Arc::clone(&backend), group, StoreConfig::default())
            .await
            .unwrap();
    ana_store.load().await.unwrap();
    bea_store.load().await.unwrap();

    bea_store.send(bea, "temples at dawn").await.unwrap();
    ana_store.send(ana, "ramen crawl").await.unwrap();

    let settled = |s: &BoardSnapshot| s.wishes.len() == 2 && s.optimistic_count() == 0;
    let seen_by_ana = wait_for(&ana_store, settled).await;
    let seen_by_bea = wait_for(&bea_store, settled).await;

    let ids = |s: &BoardSnapshot| s.wishes.iter().map(|w| w.id).collect::<Vec<_>>();
    assert_eq!(ids(&seen_by_ana), ids(&seen_by_bea));

    ana_store.close().await;
    bea_store.close().await;
}

#[tokio::test]
async fn close_releases_the_feed() {
    let backend = Arc::new(local::in_memory().unwrap());
    let group = {
        let db = backend.database();
        let mut db = db.lock().unwrap();
        let ana = db.upsert_user(UserId::new(), "Ana").unwrap().id;
        db.create_group("Oslo", ana).unwrap().id
    };

    let (store, _notes) = WishStore::spawn(Arc::clone(&backend), group, StoreConfig::default())
        .await
        .unwrap();
    assert_eq!(backend.feed().subscriber_count(group), 1);

    store.close().await;

    tokio::time::timeout(WAIT, async {
        while backend.feed().subscriber_count(group) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("feed receiver still alive");
    assert!(matches!(store.load().await, Err(WishError::Closed)));
}

// ---------------------------------------------------------------------------
// Scenarios against the scripted backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn optimistic_entry_is_visible_before_insert_completes() {
    let gate = Arc::new(Semaphore::new(0));
    let mut scripted = Scripted::new(7);
    scripted.gate = Some(Arc::clone(&gate));
    let (_backend, store, _notes) = spawn_scripted(scripted).await;
    let bea = UserId::new();

    let local_id = store.send(bea, "yes!").await.unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.pending, 1);
    assert_eq!(snapshot.wishes.len(), 1);
    assert!(snapshot.wishes[0].is_optimistic);
    assert_eq!(snapshot.wishes[0].id, local_id);

    gate.add_permits(1);

    // No feed echo from this backend: the insert reply reconciles.
    let settled = wait_for(&store, |s| s.pending == 0).await;
    assert_eq!(settled.wishes.len(), 1);
    assert!(!settled.wishes[0].is_optimistic);
    assert_eq!(settled.wishes[0].id, 100);
}

#[tokio::test]
async fn echo_then_reply_leaves_one_confirmed_entry() {
    let scripted = Scripted::new(7);
    scripted.echo_inserts.store(true, Ordering::SeqCst);
    let (_backend, store, _notes) = spawn_scripted(scripted).await;
    let bea = UserId::new();

    store.send(bea, "yes!").await.unwrap();

    let settled = wait_for(&store, |s| s.pending == 0 && s.optimistic_count() == 0).await;
    assert_eq!(settled.wishes.len(), 1);
    assert_eq!(settled.wishes[0].id, 100);
}

#[tokio::test]
async fn redelivered_events_are_ingested_once() {
    let (backend, store, _notes) = spawn_scripted(Scripted::new(7)).await;
    let ana = UserId::new();
    let record = backend.confirmed(2, ana, "museum?");

    backend.push(record.clone()).await;
    backend.push(record.clone()).await;
    backend.push(backend.confirmed(3, ana, "gelato")).await;

    let snapshot = wait_for(&store, |s| s.wishes.iter().any(|w| w.id == 3)).await;
    assert_eq!(snapshot.wishes.iter().filter(|w| w.id == 2).count(), 1);
    assert_eq!(snapshot.wishes.len(), 2);
}

#[tokio::test]
async fn event_for_snapshot_row_does_not_duplicate() {
    let scripted = Scripted::new(7);
    let ana = UserId::new();
    let row = scripted.confirmed(1, ana, "beach?");
    *scripted.history.lock().unwrap() = Some(vec![row.clone()]);
    let (backend, store, _notes) = spawn_scripted(scripted).await;

    store.load().await.unwrap();
    backend.push(row).await;
    backend.push(backend.confirmed(2, ana, "marker")).await;

    let snapshot = wait_for(&store, |s| s.wishes.iter().any(|w| w.id == 2)).await;
    assert_eq!(snapshot.wishes.len(), 2);
}

#[tokio::test]
async fn failed_load_keeps_the_list_and_reports() {
    let (backend, store, mut notes) = spawn_scripted(Scripted::new(7)).await;
    let ana = UserId::new();
    backend.push(backend.confirmed(5, ana, "live one")).await;
    wait_for(&store, |s| s.wishes.len() == 1).await;

    *backend.history.lock().unwrap() = None;
    let err = store.load().await.unwrap_err();

    assert!(matches!(err, WishError::Fetch(_)));
    assert!(matches!(
        next_notification(&mut notes).await,
        StoreNotification::LoadFailed { .. }
    ));
    let snapshot = store.snapshot();
    assert!(matches!(snapshot.status, BoardStatus::Failed(_)));
    assert_eq!(snapshot.wishes.len(), 1);
}

#[tokio::test]
async fn rejected_insert_rolls_back() {
    let scripted = Scripted::new(7);
    scripted.fail_inserts.store(true, Ordering::SeqCst);
    let (_backend, store, mut notes) = spawn_scripted(scripted).await;

    let local_id = store.send(UserId::new(), "hi").await.unwrap();

    assert!(matches!(
        next_notification(&mut notes).await,
        StoreNotification::SendFailed { local_id: id, .. } if id == local_id
    ));
    let snapshot = wait_for(&store, |s| s.pending == 0).await;
    assert!(snapshot.wishes.is_empty());
}

#[tokio::test]
async fn invalid_text_never_reaches_the_board() {
    let (_backend, store, _notes) = spawn_scripted(Scripted::new(7)).await;

    assert!(matches!(
        store.send(UserId::new(), "   ").await,
        Err(WishError::EmptyMessage)
    ));
    assert!(matches!(
        store.send(UserId::new(), "x".repeat(5000)).await,
        Err(WishError::TooLong { .. })
    ));
    assert!(store.snapshot().wishes.is_empty());
}

#[tokio::test]
async fn feed_names_are_resolved_by_lookup() {
    let mut scripted = Scripted::new(7);
    let ana = UserId::new();
    let ghost = UserId::new();
    scripted.names.insert(ana, "Ana".into());
    let (backend, store, _notes) = spawn_scripted(scripted).await;

    backend.push(backend.confirmed(1, ana, "beach?")).await;
    backend.push(backend.confirmed(2, ghost, "boo")).await;

    let snapshot = wait_for(&store, |s| s.wishes.len() == 2).await;
    let name_of = |id| {
        snapshot
            .wishes
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.sender_name.clone())
            .unwrap()
    };
    assert_eq!(name_of(1), "Ana");
    assert_eq!(name_of(2), UNKNOWN_SENDER);
}

#[tokio::test]
async fn carried_names_skip_the_lookup() {
    let (backend, store, _notes) = spawn_scripted(Scripted::new(7)).await;
    let ana = UserId::new();
    let mut row = backend.confirmed(1, ana, "beach?");
    row.sender_name = "Ana".into();

    backend.push(row).await;

    let snapshot = wait_for(&store, |s| s.wishes.len() == 1).await;
    assert_eq!(snapshot.wishes[0].sender_name, "Ana");
    assert_eq!(backend.name_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_name_lookup_does_not_hold_up_sends() {
    let names = Arc::new(Semaphore::new(0));
    let mut scripted = Scripted::new(7);
    let ana = UserId::new();
    let bea = UserId::new();
    scripted.names.insert(ana, "Ana".into());
    scripted.names.insert(bea, "Bea".into());
    scripted.name_gate = Some(Arc::clone(&names));
    let (backend, store, _notes) = spawn_scripted(scripted).await;

    backend.push(backend.confirmed(1, ana, "beach?")).await;
    tokio::time::timeout(WAIT, async {
        while backend.name_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("lookup never started");

    let local_id = tokio::time::timeout(Duration::from_millis(500), store.send(bea, "yes!"))
        .await
        .expect("send stalled behind the name lookup")
        .unwrap();

    let snapshot = store.snapshot();
    assert!(snapshot.wishes.iter().any(|w| w.id == local_id));
    assert!(snapshot.wishes.iter().all(|w| w.id != 1));

    names.add_permits(10);
    let settled = wait_for(&store, |s| s.wishes.iter().any(|w| w.id == 1)).await;
    let row = settled.wishes.iter().find(|w| w.id == 1).unwrap();
    assert_eq!(row.sender_name, "Ana");
}

#[tokio::test]
async fn first_send_shows_the_author_once_known() {
    let inserts = Arc::new(Semaphore::new(0));
    let mut scripted = Scripted::new(7);
    let bea = UserId::new();
    scripted.names.insert(bea, "Bea".into());
    scripted.gate = Some(Arc::clone(&inserts));
    let (_backend, store, _notes) = spawn_scripted(scripted).await;

    let local_id = store.send(bea, "yes!").await.unwrap();
    let placeholder = store.snapshot().wishes[0].clone();
    assert_eq!(placeholder.id, local_id);
    assert!(!placeholder.sender_name.is_empty());

    let named = wait_for(&store, |s| {
        s.wishes
            .iter()
            .any(|w| w.id == local_id && w.is_optimistic && w.sender_name == "Bea")
    })
    .await;
    assert_eq!(named.pending, 1);

    inserts.add_permits(1);
    let settled = wait_for(&store, |s| s.pending == 0).await;
    assert_eq!(settled.wishes[0].sender_name, "Bea");
}

#[tokio::test]
async fn closed_feed_is_reported_and_not_reopened() {
    let (backend, store, mut notes) = spawn_scripted(Scripted::new(7)).await;

    backend.close_feed();

    assert_eq!(
        next_notification(&mut notes).await,
        StoreNotification::FeedClosed
    );
    // Sends keep working through the insert reply.
    store.send(UserId::new(), "still here").await.unwrap();
    let snapshot = wait_for(&store, |s| s.pending == 0).await;
    assert_eq!(snapshot.wishes.len(), 1);
    assert!(!snapshot.wishes[0].is_optimistic);
}

#[tokio::test]
async fn refused_subscription_fails_spawn() {
    let mut scripted = Scripted::new(7);
    scripted.fail_subscribe = true;

    let result = WishStore::spawn(Arc::new(scripted), 7, StoreConfig::default()).await;

    assert!(matches!(result, Err(WishError::Subscription(_))));
}
