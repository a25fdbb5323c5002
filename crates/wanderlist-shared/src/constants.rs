/// Longest wish text accepted by the client store and the server.
pub const MAX_WISH_LEN: usize = 1000;

/// Default HTTP port of the collaboration server.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default per-group capacity of the change-feed broadcast channel.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Name shown for authors whose profile could not be resolved.
pub const UNKNOWN_SENDER: &str = "Unknown traveler";
