//! Types shared by every Wanderlist crate: identifiers, the wish record and
//! the change-feed wire format.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::WireError;
pub use protocol::{FeedEvent, NewWish, Wish};
pub use types::{GroupId, UserId, WishId};
