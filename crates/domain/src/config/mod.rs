mod client;
mod node;

pub use client::*;
pub use node::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root of a `flowlink.toml` file. Either half may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

impl Config {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&raw).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("parsing {}: {msg}", path.display())),
            other => other,
        })
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.node.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_uses_all_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.client.address, "ws://127.0.0.1:10003/v1/rpc/ws");
        assert_eq!(cfg.node.server.port, 10003);
        assert!(cfg.node.users.is_empty());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [client]
            address = "ws://10.0.0.5:9000/v1/rpc/ws"
            heartbeat_interval_secs = 5

            [node]
            [[node.users]]
            username = "user1"
            password = "test"
            permissions = ["StartProcess:CashIssue", "InvokeOperation:nodeInfo"]
            "#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.client.address, "ws://10.0.0.5:9000/v1/rpc/ws");
        assert_eq!(cfg.client.heartbeat_interval_secs, 5);
        assert_eq!(cfg.node.users.len(), 1);
        assert_eq!(cfg.node.users[0].permissions.len(), 2);
    }

    #[test]
    fn load_rejects_bad_permission_strings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[node.users]]
            username = "user1"
            password = "test"
            permissions = ["startFlow.CashIssue"]
            "#
        )
        .unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("startFlow.CashIssue"), "{err}");
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.client.max_message_bytes, 1024 * 1024);
    }
}
