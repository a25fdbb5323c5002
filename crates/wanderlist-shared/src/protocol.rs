use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::{GroupId, UserId, WishId};

/// A single contribution to a group's wishlist discussion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Wish {
    pub id: WishId,
    pub group_id: GroupId,
    pub user_id: UserId,
    /// Display name of the author, resolved at read time.
    #[serde(default)]
    pub sender_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// True only for local entries the server has not confirmed yet.
    #[serde(default)]
    pub is_optimistic: bool,
}

impl Wish {
    /// Build the placeholder shown while an insert is in flight.
    pub fn optimistic(
        local_id: WishId,
        group_id: GroupId,
        user_id: UserId,
        sender_name: String,
        message: String,
    ) -> Self {
        Self {
            id: local_id,
            group_id,
            user_id,
            sender_name,
            message,
            created_at: Utc::now(),
            is_optimistic: true,
        }
    }

    /// Whether this entry and `other` carry the same author and text.
    pub fn same_content(&self, other: &Wish) -> bool {
        self.user_id == other.user_id && self.message == other.message
    }
}

/// Insert command payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewWish {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub message: String,
}

/// Events pushed on a group's change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedEvent {
    /// A wish row was committed.
    Insert { record: Wish },
}

impl FeedEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            FeedEvent::Insert { record } => record.group_id,
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(data)?)
    }
}
