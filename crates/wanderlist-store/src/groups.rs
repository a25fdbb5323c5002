//! CRUD operations for [`Group`] records and their memberships.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::{not_found, Database};
use crate::error::Result;
use crate::models::{format_ts, parse_ts, parse_user_id, Group, GroupId, UserId};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group. The owner is enrolled as its first member.
    pub fn create_group(&mut self, name: &str, owner_id: UserId) -> Result<Group> {
        let now = Utc::now();
        let created = format_ts(&now);

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO groups (name, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, owner_id.to_string(), created],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![id, owner_id.to_string(), created],
        )?;
        tx.commit()?;

        tracing::debug!(group_id = id, owner = %owner_id, "group created");
        self.get_group(id)
    }

    /// Add a member. Returns `false` if they already belonged to the group.
    pub fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        // Surface a missing group as NotFound rather than a FK violation.
        self.get_group(group_id)?;

        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![group_id, user_id.to_string(), format_ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, owner_id, created_at FROM groups WHERE id = ?1",
                params![id],
                row_to_group,
            )
            .map_err(not_found)
    }

    /// Groups the user belongs to, newest first.
    pub fn list_groups_for_user(&self, user_id: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.owner_id, g.created_at
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC, g.id DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    pub fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group together with its memberships and wishes.
    pub fn delete_group(&self, id: GroupId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id: GroupId = row.get(0)?;
    let name: String = row.get(1)?;
    let owner_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(Group {
        id,
        name,
        owner_id: parse_user_id(2, &owner_str)?,
        created_at: parse_ts(3, &created_str)?,
    })
}
