use thiserror::Error;

use wanderlist_shared::{GroupId, UserId};

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The author does not belong to the group they are posting in.
    #[error("User {user} is not a member of group {group}")]
    NotMember { user: UserId, group: GroupId },

    /// Wish text was empty after trimming.
    #[error("Wish text is empty")]
    EmptyMessage,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
