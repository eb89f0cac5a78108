//! Builder pattern for constructing a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use fl_domain::config::ClientConfig;
use fl_domain::Credential;
use fl_protocol::ops::OperationTable;

use crate::client::Client;
use crate::proxy::Proxy;
use crate::retry::RetryPolicy;
use crate::session::{Connection, SessionConfig};
use crate::types::ClientError;

/// Fluent builder for [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// # use fl_client::ClientBuilder;
/// # use fl_domain::Credential;
/// # async fn run() -> Result<(), fl_client::ClientError> {
/// let client = ClientBuilder::new("ws://localhost:10003/v1/rpc/ws")
///     .heartbeat_interval(std::time::Duration::from_secs(5))
///     .login(&Credential::new("user1", "test"))
///     .await?;
/// # Ok(()) }
/// ```
pub struct ClientBuilder {
    address: String,
    session: SessionConfig,
    operations: OperationTable,
}

impl ClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            session: SessionConfig::default(),
            operations: OperationTable::standard(),
        }
    }

    /// Take address and timings from a config section. Its `retry` table
    /// converts with `RetryPolicy::from(&cfg.retry)`.
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            address: cfg.address.clone(),
            session: SessionConfig::from(cfg),
            operations: OperationTable::standard(),
        }
    }

    // ── Timing ───────────────────────────────────────────────────────

    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.session.heartbeat_interval = d;
        self
    }

    /// Silence after which the node is considered lost.
    pub fn heartbeat_timeout(mut self, d: Duration) -> Self {
        self.session.heartbeat_timeout = d;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.session.connect_timeout = d;
        self
    }

    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.session.handshake_timeout = d;
        self
    }

    /// `None` lets requests wait as long as the session lives.
    pub fn request_timeout(mut self, d: Option<Duration>) -> Self {
        self.session.request_timeout = d;
        self
    }

    pub fn max_message_bytes(mut self, n: usize) -> Self {
        self.session.max_message_bytes = n;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Replace the operation table used for local argument checks.
    pub fn operations(mut self, table: OperationTable) -> Self {
        self.operations = table;
        self
    }

    fn validate(&self) -> Result<(), ClientError> {
        if !(self.address.starts_with("ws://") || self.address.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "address must be a ws:// or wss:// URL, got {:?}",
                self.address
            )));
        }
        if self.session.heartbeat_interval.is_zero() {
            return Err(ClientError::Config("heartbeat_interval must be non-zero".into()));
        }
        if self.session.heartbeat_timeout <= self.session.heartbeat_interval {
            return Err(ClientError::Config(
                "heartbeat_timeout must be longer than heartbeat_interval".into(),
            ));
        }
        Ok(())
    }

    /// Open and handshake a connection without logging in.
    pub async fn connect(&self) -> Result<Connection, ClientError> {
        self.validate()?;
        Connection::connect(&self.address, self.session.clone()).await
    }

    /// Connect and authenticate once. No retries.
    pub async fn login(self, credential: &Credential) -> Result<Client, ClientError> {
        let session = self.connect().await?.authenticate(credential).await?;
        Ok(Client::from_proxy(Proxy::new(session, Arc::new(self.operations))))
    }

    /// Connect and authenticate, retrying connection failures with
    /// `policy`'s back-off. A rejected credential is never retried.
    pub async fn login_with_retry(
        self,
        credential: &Credential,
        policy: &RetryPolicy,
    ) -> Result<Client, ClientError> {
        self.validate()?;
        let mut backoff = policy.schedule_for(&self.address);
        loop {
            let outcome = match Connection::connect(&self.address, self.session.clone()).await {
                Ok(conn) => conn.authenticate(credential).await,
                Err(e) => Err(e),
            };

            let err = match outcome {
                Ok(session) => {
                    return Ok(Client::from_proxy(Proxy::new(session, Arc::new(self.operations))));
                }
                Err(e) if e.is_connection() => e,
                Err(e) => return Err(e),
            };
            let Some(delay) = backoff.next() else {
                tracing::warn!(
                    address = %self.address,
                    attempts = backoff.retries() + 1,
                    error = %err,
                    "login failed, giving up"
                );
                return Err(err);
            };
            tracing::warn!(
                address = %self.address,
                attempt = backoff.retries(),
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "login failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_websocket_address() {
        let err = ClientBuilder::new("http://localhost:10003")
            .connect()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_timeout_shorter_than_interval() {
        let err = ClientBuilder::new("ws://localhost:10003/v1/rpc/ws")
            .heartbeat_interval(Duration::from_secs(10))
            .heartbeat_timeout(Duration::from_secs(5))
            .connect()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn from_config_copies_settings() {
        let cfg = ClientConfig {
            address: "ws://node:1/v1/rpc/ws".into(),
            heartbeat_interval_secs: 3,
            ..ClientConfig::default()
        };
        let b = ClientBuilder::from_config(&cfg);
        assert_eq!(b.address, "ws://node:1/v1/rpc/ws");
        assert_eq!(b.session.heartbeat_interval, Duration::from_secs(3));
        assert!(b.validate().is_ok());
    }
}
