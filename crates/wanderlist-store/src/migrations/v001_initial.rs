//! v001 -- Initial schema creation.
//!
//! Creates `users`, `groups`, `group_members` and `wishes`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    owner_id   TEXT NOT NULL,                 -- FK -> users(id)
    created_at TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  INTEGER NOT NULL,               -- FK -> groups(id)
    user_id   TEXT NOT NULL,                  -- FK -> users(id)
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Wishes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS wishes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id   INTEGER NOT NULL,              -- FK -> groups(id)
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    message    TEXT NOT NULL,
    created_at TEXT NOT NULL,                 -- RFC-3339, UTC

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_wishes_group_ts
    ON wishes(group_id, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
