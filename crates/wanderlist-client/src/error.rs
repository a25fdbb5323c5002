use thiserror::Error;

/// Failures reported by a [`WishBackend`](crate::backend::WishBackend).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] wanderlist_shared::WireError),

    #[error("Store error: {0}")]
    Store(#[from] wanderlist_store::StoreError),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Backend task failed: {0}")]
    Task(String),
}

/// Errors surfaced by the wish store to its callers.
#[derive(Error, Debug)]
pub enum WishError {
    /// Loading the group history failed; the list was left untouched.
    #[error("Failed to load wishes: {0}")]
    Fetch(#[source] BackendError),

    /// The insert was rejected; the optimistic entry has been rolled back.
    #[error("Failed to send wish: {0}")]
    Send(#[source] BackendError),

    /// The change feed could not be opened.
    #[error("Failed to subscribe to change feed: {0}")]
    Subscription(#[source] BackendError),

    #[error("Wish text is empty")]
    EmptyMessage,

    #[error("Wish is too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    /// The store task has shut down.
    #[error("Wish store is closed")]
    Closed,
}
