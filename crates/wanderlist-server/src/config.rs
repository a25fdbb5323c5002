//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use wanderlist_shared::constants::{DEFAULT_FEED_CAPACITY, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./wanderlist.db`
    pub database_path: PathBuf,

    /// Buffered events per group before slow feed subscribers start lagging.
    /// Env: `FEED_CAPACITY`
    /// Default: `256`
    pub feed_capacity: usize,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Wanderlist"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./wanderlist.db"),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            instance_name: "Wanderlist".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = get("FEED_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.feed_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid FEED_CAPACITY, using default"),
            }
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}
