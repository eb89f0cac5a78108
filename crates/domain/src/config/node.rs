use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::permission::PermissionSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub server: NodeServerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub flows: FlowsConfig,
}

impl NodeConfig {
    /// Check every user's permission strings parse.
    pub fn validate(&self) -> Result<()> {
        for user in &self.users {
            user.permission_set()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    /// `0` binds an ephemeral port.
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_path")]
    pub path: String,
    #[serde(default = "d_login_timeout")]
    pub login_timeout_secs: u64,
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for NodeServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            path: d_path(),
            login_timeout_secs: d_login_timeout(),
            max_message_bytes: d_max_message_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Legal name reported by `nodeInfo`.
    #[serde(default = "d_legal_name")]
    pub legal_name: String,
    #[serde(default = "d_platform_version")]
    pub platform_version: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            legal_name: d_legal_name(),
            platform_version: d_platform_version(),
        }
    }
}

/// An RPC user provisioned on the node.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl UserConfig {
    pub fn permission_set(&self) -> Result<PermissionSet> {
        PermissionSet::parse(&self.permissions)
    }
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Artificial latency before `CashIssue` completes.
    #[serde(default)]
    pub cash_issue_delay_ms: u64,
    #[serde(default = "d_max_concurrent_flows")]
    pub max_concurrent_flows: usize,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            cash_issue_delay_ms: 0,
            max_concurrent_flows: d_max_concurrent_flows(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    10003
}

fn d_path() -> String {
    "/v1/rpc/ws".into()
}

fn d_login_timeout() -> u64 {
    10
}

fn d_max_message_bytes() -> usize {
    1024 * 1024
}

fn d_legal_name() -> String {
    "O=Alice Corp, L=Madrid, C=ES".into()
}

fn d_platform_version() -> u32 {
    1
}

fn d_max_concurrent_flows() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_debug_hides_password() {
        let user = UserConfig {
            username: "user1".into(),
            password: "test".into(),
            permissions: vec!["ALL".into()],
        };
        let shown = format!("{user:?}");
        assert!(!shown.contains("\"test\""));
        assert!(shown.contains("ALL"));
    }

    #[test]
    fn empty_node_section_uses_defaults() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.path, "/v1/rpc/ws");
        assert_eq!(cfg.flows.cash_issue_delay_ms, 0);
        assert_eq!(cfg.flows.max_concurrent_flows, 64);
    }
}
