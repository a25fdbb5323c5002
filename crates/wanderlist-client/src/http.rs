//! Backend that talks to `wanderlist-server` over REST and a WebSocket feed.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use wanderlist_shared::{FeedEvent, GroupId, NewWish, UserId, Wish, WireError};
use wanderlist_store::User;

use crate::backend::{FeedSubscription, WishBackend};
use crate::config::ClientConfig;
use crate::error::BackendError;

const FEED_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    /// Also bounds the WebSocket handshake, which `reqwest` does not cover.
    request_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostWishRequest<'a> {
    user_id: UserId,
    message: &'a str,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `http(s)://host/...` -> `ws(s)://host/...`
    fn feed_url(&self, group_id: GroupId) -> String {
        let path = format!("/groups/{group_id}/feed");
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}{path}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}{path}")
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

/// Turn non-2xx responses into [`BackendError::Status`], keeping the
/// server's `{"error": "..."}` message when there is one.
async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl WishBackend for HttpBackend {
    async fn fetch_wishes(&self, group_id: GroupId) -> Result<Vec<Wish>, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("/groups/{group_id}/wishes")))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn insert_wish(&self, wish: NewWish) -> Result<Wish, BackendError> {
        let body = PostWishRequest {
            user_id: wish.user_id,
            message: &wish.message,
        };
        let resp = self
            .client
            .post(self.url(&format!("/groups/{}/wishes", wish.group_id)))
            .json(&body)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn subscribe(&self, group_id: GroupId) -> Result<FeedSubscription, BackendError> {
        let url = self.feed_url(group_id);
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (mut socket, _) = tokio::time::timeout(self.request_timeout, connect)
            .await
            .map_err(|_| BackendError::Timeout(self.request_timeout))??;
        info!(url = %url, "change feed connected");

        let (tx, events) = mpsc::channel(FEED_BUFFER);
        let pump = tokio::spawn(async move {
            while let Some(frame) = socket.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(group_id, error = %e, "change feed error");
                        break;
                    }
                };
                match decode_frame(frame) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(FrameError::Closed) => break,
                    Err(FrameError::Wire(e)) => {
                        warn!(group_id, error = %e, "skipping unreadable feed frame");
                    }
                }
            }
            debug!(group_id, "change feed pump stopped");
        });

        Ok(FeedSubscription::new(events, pump))
    }

    async fn display_name(&self, user_id: UserId) -> Result<String, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{user_id}")))
            .send()
            .await?;
        let user: User = check(resp).await?.json().await?;
        Ok(user.display_name)
    }
}

enum FrameError {
    Closed,
    Wire(WireError),
}

fn decode_frame(frame: Message) -> Result<Option<FeedEvent>, FrameError> {
    match frame {
        Message::Text(text) => FeedEvent::from_json(&text)
            .map(Some)
            .map_err(FrameError::Wire),
        Message::Binary(data) => Err(FrameError::Wire(WireError::UnexpectedFrame(format!(
            "{} byte binary frame",
            data.len()
        )))),
        Message::Close(_) => Err(FrameError::Closed),
        _ => Ok(None),
    }
}
