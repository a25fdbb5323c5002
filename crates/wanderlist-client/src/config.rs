//! Client configuration loaded from environment variables.

use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the collaboration server.
    /// Env: `WANDERLIST_API_URL`
    /// Default: `http://127.0.0.1:8080`
    pub api_url: String,

    /// Capacity of the notification channel handed to the UI.
    /// Env: `WANDERLIST_NOTIFY_CAPACITY`
    /// Default: `64`
    pub notify_capacity: usize,

    /// Capacity of the command channel between handles and the store task.
    pub command_capacity: usize,

    /// Timeout applied to every REST request.
    /// Env: `WANDERLIST_REQUEST_TIMEOUT_SECS`
    /// Default: `10`
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            notify_capacity: 64,
            command_capacity: 32,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = get("WANDERLIST_API_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.api_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid WANDERLIST_API_URL, using default");
            }
        }

        if let Some(val) = get("WANDERLIST_NOTIFY_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.notify_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid WANDERLIST_NOTIFY_CAPACITY, using default"),
            }
        }

        if let Some(val) = get("WANDERLIST_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.request_timeout = Duration::from_secs(n),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid WANDERLIST_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        config
    }
}
