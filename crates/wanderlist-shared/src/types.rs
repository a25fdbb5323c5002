use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a collaborative group.
pub type GroupId = i64;

/// Identifier of a wish. Server-assigned for confirmed wishes, taken from
/// the local clock for optimistic ones.
pub type WishId = i64;

/// Author identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Topic name used when logging or routing a group's change feed.
pub fn group_topic(group_id: GroupId) -> String {
    format!("group:{group_id}:wishes")
}
