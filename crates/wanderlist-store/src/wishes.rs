//! CRUD operations for wishes.
//!
//! Reads always join the author's display name so callers receive fully
//! decorated [`Wish`] records.

use chrono::Utc;
use rusqlite::params;

use wanderlist_shared::{NewWish, WishId};

use crate::database::{not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{format_ts, parse_ts, parse_user_id, GroupId, Wish};

const SELECT_WISH: &str = "SELECT w.id, w.group_id, w.user_id, u.display_name, w.message, w.created_at
     FROM wishes w
     JOIN users u ON u.id = w.user_id";

impl Database {
    /// Store a wish and return the committed row.
    ///
    /// The text is stored verbatim; clients reconcile optimistic entries by
    /// exact author and text match.
    pub fn insert_wish(&self, wish: &NewWish) -> Result<Wish> {
        if wish.message.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        self.get_group(wish.group_id)?;
        if !self.is_member(wish.group_id, wish.user_id)? {
            return Err(StoreError::NotMember {
                user: wish.user_id,
                group: wish.group_id,
            });
        }

        self.conn().execute(
            "INSERT INTO wishes (group_id, user_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                wish.group_id,
                wish.user_id.to_string(),
                wish.message,
                format_ts(&Utc::now()),
            ],
        )?;

        let id = self.conn().last_insert_rowid();
        tracing::debug!(wish_id = id, group_id = wish.group_id, "wish stored");
        self.get_wish(id)
    }

    /// Full history of a group, oldest first.
    pub fn list_wishes_for_group(&self, group_id: GroupId) -> Result<Vec<Wish>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_WISH}
             WHERE w.group_id = ?1
             ORDER BY w.created_at ASC, w.id ASC"
        ))?;

        let rows = stmt.query_map(params![group_id], row_to_wish)?;

        let mut wishes = Vec::new();
        for row in rows {
            wishes.push(row?);
        }
        Ok(wishes)
    }

    pub fn get_wish(&self, id: WishId) -> Result<Wish> {
        self.conn()
            .query_row(
                &format!("{SELECT_WISH} WHERE w.id = ?1"),
                params![id],
                row_to_wish,
            )
            .map_err(not_found)
    }
}

fn row_to_wish(row: &rusqlite::Row<'_>) -> rusqlite::Result<Wish> {
    let id: WishId = row.get(0)?;
    let group_id: GroupId = row.get(1)?;
    let user_str: String = row.get(2)?;
    let sender_name: String = row.get(3)?;
    let message: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    Ok(Wish {
        id,
        group_id,
        user_id: parse_user_id(2, &user_str)?,
        sender_name,
        message,
        created_at: parse_ts(5, &ts_str)?,
        is_optimistic: false,
    })
}
