//! # wanderlist-store
//!
//! SQLite persistence for Wanderlist groups and their wishes.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for every domain model, and
//! a [`ChangeFeed`] that fans newly committed wishes out to per-group
//! subscribers.

pub mod database;
pub mod feed;
pub mod groups;
pub mod migrations;
pub mod models;
pub mod users;
pub mod wishes;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use feed::ChangeFeed;
pub use models::*;
