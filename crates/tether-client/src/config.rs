//! Client configuration.
//!
//! Everything is read from `TETHER_*` environment variables with built-in
//! defaults; there is no config file. `ClientConfig::from_env()` never fails
//! on missing variables, only when the platform data directory cannot be
//! resolved.

use std::time::Duration;

use tether_core::{resolve_state_paths, StatePaths};
use tether_wire::{StreamEndpoint, API_PREFIX};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the workflow server, e.g. `http://127.0.0.1:8000`.
    pub server_url: String,
    /// Value of `TETHER_API_TOKEN`. Sent as `Authorization: Bearer <token>`
    /// on REST calls when non-empty.
    pub api_token: String,
    pub reconnect_max_attempts: u32,
    pub reconnect_interval: Duration,
    pub request_timeout: Duration,
    pub state: StatePaths,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let server_url = std::env::var("TETHER_SERVER_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let api_token = std::env::var("TETHER_API_TOKEN").unwrap_or_default();

        Ok(Self {
            server_url,
            api_token,
            reconnect_max_attempts: env_number(
                "TETHER_RECONNECT_MAX_ATTEMPTS",
                DEFAULT_RECONNECT_MAX_ATTEMPTS,
            ),
            reconnect_interval: Duration::from_secs(env_number(
                "TETHER_RECONNECT_INTERVAL_SECS",
                DEFAULT_RECONNECT_INTERVAL_SECS,
            )),
            request_timeout: Duration::from_secs(env_number(
                "TETHER_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            state: resolve_state_paths()?,
        })
    }

    /// REST root, e.g. `http://127.0.0.1:8000/api/v1/workflows`.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), API_PREFIX)
    }

    /// WebSocket URL for one stream of one task. `http` maps to `ws` and
    /// `https` to `wss`; explicit `ws`/`wss` URLs pass through.
    pub fn ws_url(&self, endpoint: StreamEndpoint, task_id: &str) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{}/{task_id}", endpoint.path_prefix())
    }
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
