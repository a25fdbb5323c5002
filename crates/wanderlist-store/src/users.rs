//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::params;

use crate::database::{not_found, Database};
use crate::error::Result;
use crate::models::{format_ts, parse_ts, parse_user_id, User, UserId};

impl Database {
    /// Insert a user or rename an existing one. Returns the stored record.
    pub fn upsert_user(&self, id: UserId, display_name: &str) -> Result<User> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO users (id, display_name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![id.to_string(), display_name, format_ts(&now)],
        )?;
        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Resolve only the display name (the author lookup used to decorate
    /// live wishes).
    pub fn display_name(&self, id: UserId) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let created_str: String = row.get(2)?;

    Ok(User {
        id: parse_user_id(0, &id_str)?,
        display_name,
        created_at: parse_ts(2, &created_str)?,
    })
}
