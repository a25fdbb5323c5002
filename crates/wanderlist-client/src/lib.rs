//! # wanderlist-client
//!
//! Realtime view of a group's wishes. A [`WishStore`] merges the group
//! history, the live change feed and the user's own optimistic sends into
//! one ordered, deduplicated list.

pub mod backend;
pub mod board;
pub mod config;
pub mod error;
pub mod http;
pub mod local;
pub mod store;

pub use backend::{FeedSubscription, WishBackend};
pub use board::{BoardChange, BoardEvent, BoardSnapshot, BoardStatus, WishBoard};
pub use config::ClientConfig;
pub use error::{BackendError, WishError};
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use store::{StoreConfig, StoreNotification, WishStore, WishStoreHandle};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
