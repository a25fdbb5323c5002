use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, State,
    },
    http::{Method, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use wanderlist_shared::constants::MAX_WISH_LEN;
use wanderlist_shared::{FeedEvent, GroupId, NewWish, UserId, Wish};
use wanderlist_store::{ChangeFeed, Database, Group, User};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub feed: ChangeFeed,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            feed: ChangeFeed::new(config.feed_capacity),
            config: Arc::new(config),
        }
    }

    /// Never hold the guard across an `.await`.
    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|e| ServerError::Internal(format!("Database lock poisoned: {e}")))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/users", post(upsert_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/groups", get(user_groups))
        .route("/groups", post(create_group))
        .route("/groups/:id", get(get_group))
        .route("/groups/:id/members", post(add_member))
        .route("/groups/:id/wishes", get(list_wishes).post(post_wish))
        .route("/groups/:id/feed", get(wish_feed))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    feed_capacity: usize,
    max_wish_len: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertUserRequest {
    #[serde(default)]
    id: Option<UserId>,
    display_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    owner_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    user_id: UserId,
}

#[derive(Serialize)]
struct AddMemberResponse {
    added: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostWishRequest {
    user_id: UserId,
    message: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        feed_capacity: state.config.feed_capacity,
        max_wish_len: MAX_WISH_LEN,
    })
}

// ─── Users ───

async fn upsert_user(
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let name = req.display_name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("displayName must not be empty".into()));
    }
    let id = req.id.unwrap_or_default();
    let user = state.db()?.upsert_user(id, name)?;

    info!(user = %user.id.short(), "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.db()?.get_user(id)?))
}

async fn user_groups(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let db = state.db()?;
    db.get_user(id)?;
    Ok(Json(db.list_groups_for_user(id)?))
}

// ─── Groups ───

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Group name must not be empty".into()));
    }
    let group = {
        let mut db = state.db()?;
        db.get_user(req.owner_id)?;
        db.create_group(name, req.owner_id)?
    };

    info!(group_id = group.id, owner = %group.owner_id.short(), "Group created");
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<Json<Group>, ServerError> {
    Ok(Json(state.db()?.get_group(id)?))
}

async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<AddMemberResponse>, ServerError> {
    let added = {
        let db = state.db()?;
        db.get_user(req.user_id)?;
        db.add_member(group_id, req.user_id)?
    };

    if added {
        info!(group_id, user = %req.user_id.short(), "Member joined group");
    }
    Ok(Json(AddMemberResponse { added }))
}

// ─── Wishes ───

async fn list_wishes(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<Vec<Wish>>, ServerError> {
    let db = state.db()?;
    db.get_group(group_id)?;
    Ok(Json(db.list_wishes_for_group(group_id)?))
}

async fn post_wish(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<PostWishRequest>,
) -> Result<(StatusCode, Json<Wish>), ServerError> {
    let len = req.message.chars().count();
    if len > MAX_WISH_LEN {
        return Err(ServerError::BadRequest(format!(
            "Wish is {len} characters (max {MAX_WISH_LEN})"
        )));
    }

    let stored = state.db()?.insert_wish(&NewWish {
        group_id,
        user_id: req.user_id,
        message: req.message,
    })?;
    let delivered = state.feed.publish(&stored);

    info!(
        wish_id = stored.id,
        group_id,
        author = %stored.user_id.short(),
        delivered,
        "Wish posted"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

// ─── Change feed ───

/// Upgrade to a WebSocket carrying one JSON text frame per committed wish.
async fn wish_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<Response, ServerError> {
    state.db()?.get_group(group_id)?;
    // Subscribe before the handshake completes so nothing committed after it
    // is missed.
    let events = state.feed.subscribe(group_id);
    Ok(ws.on_upgrade(move |socket| stream_feed(socket, group_id, events)))
}

async fn stream_feed(
    mut socket: WebSocket,
    group_id: GroupId,
    mut events: broadcast::Receiver<FeedEvent>,
) {
    debug!(group_id, "Feed socket opened");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(group_id, error = %e, "Failed to encode feed event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(group_id, skipped, "Feed socket lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(group_id, "Feed socket closed");
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
