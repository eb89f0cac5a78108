use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the node's RPC endpoint.
    #[serde(default = "d_address")]
    pub address: String,
    /// How often the session pings the node.
    #[serde(default = "d_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Silence from the node longer than this marks the session disconnected.
    #[serde(default = "d_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Budget for the hello/welcome exchange and for the login reply.
    #[serde(default = "d_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Upper bound on a single request/reply round trip. `0` disables it.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Only used by an explicit `login_with_retry`.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: d_address(),
            heartbeat_interval_secs: d_heartbeat_interval(),
            heartbeat_timeout_secs: d_heartbeat_timeout(),
            connect_timeout_secs: d_connect_timeout(),
            handshake_timeout_secs: d_handshake_timeout(),
            request_timeout_secs: d_request_timeout(),
            max_message_bytes: d_max_message_bytes(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Back-off settings for caller-requested login retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    /// Attempts including the first one. `0` means no limit.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_factor: d_backoff_factor(),
            max_attempts: d_max_attempts(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_address() -> String {
    "ws://127.0.0.1:10003/v1/rpc/ws".into()
}

fn d_heartbeat_interval() -> u64 {
    10
}

fn d_heartbeat_timeout() -> u64 {
    30
}

fn d_connect_timeout() -> u64 {
    10
}

fn d_handshake_timeout() -> u64 {
    10
}

fn d_request_timeout() -> u64 {
    60
}

fn d_max_message_bytes() -> usize {
    1024 * 1024
}

fn d_initial_delay_ms() -> u64 {
    500
}

fn d_max_delay_ms() -> u64 {
    30_000
}

fn d_backoff_factor() -> f64 {
    2.0
}

fn d_max_attempts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_request_timeout_disables_it() {
        let cfg: ClientConfig = toml::from_str("request_timeout_secs = 0").unwrap();
        assert!(cfg.request_timeout().is_none());
        assert_eq!(ClientConfig::default().request_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn retry_section_parses() {
        let cfg: ClientConfig = toml::from_str(
            r#"
            [retry]
            initial_delay_ms = 100
            max_attempts = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.retry.initial_delay_ms, 100);
        assert_eq!(cfg.retry.max_attempts, 0);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
    }
}
