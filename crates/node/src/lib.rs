//! `fl-node`: reference flowlink node.
//!
//! Serves the RPC protocol over WebSocket with a configured user table,
//! the standard operation catalogue and an in-memory cash vault. Used by
//! the `flowlink-node` binary and booted in-process by client tests:
//!
//! ```rust,no_run
//! # async fn run() -> fl_domain::Result<()> {
//! let node = fl_node::NodeServer::start(Default::default()).await?;
//! println!("serving on {}", node.ws_url());
//! node.shutdown().await;
//! # Ok(()) }
//! ```

pub mod auth;
pub mod cash;
pub mod flows;
pub mod handlers;
pub mod server;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use fl_domain::config::NodeConfig;
use fl_domain::{Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::NodeState;

pub use auth::{Principal, UserStore};
pub use flows::{FlowContext, FlowLogic, FlowStore};
pub use handlers::{CallContext, HandlerRegistry, OperationHandler};

pub struct NodeServer;

impl NodeServer {
    /// Bind and start serving in the background.
    pub async fn start(config: NodeConfig) -> Result<RunningNode> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let path = config.server.path.clone();
        let bind = format!("{}:{}", config.server.host, config.server.port);

        let state = Arc::new(NodeState::build(config, shutdown.clone())?);
        let app = Router::new()
            .route(&path, get(server::rpc_ws))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|e| Error::Config(format!("binding to {bind}: {e}")))?;
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, path = %path, "flowlink node listening");

        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "node server error");
            }
        });

        Ok(RunningNode {
            addr,
            path,
            shutdown,
            task,
        })
    }
}

/// Handle on a node started with [`NodeServer::start`]. Dropping it stops
/// the node.
pub struct RunningNode {
    addr: SocketAddr,
    path: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL clients connect to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.path)
    }

    /// Stop accepting, close every connection, fail running flows.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.task).await;
        tracing::info!(addr = %self.addr, "flowlink node stopped");
    }
}

impl Drop for RunningNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_port_and_url() {
        let mut config = NodeConfig::default();
        config.server.port = 0;
        let node = NodeServer::start(config).await.unwrap();
        assert_ne!(node.local_addr().port(), 0);
        assert!(node.ws_url().starts_with("ws://127.0.0.1:"));
        assert!(node.ws_url().ends_with("/v1/rpc/ws"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_permissions_refuse_to_start() {
        let mut config = NodeConfig::default();
        config.server.port = 0;
        config.users.push(fl_domain::config::UserConfig {
            username: "u".into(),
            password: "p".into(),
            permissions: vec!["InvokeOperation".into()],
        });
        assert!(NodeServer::start(config).await.is_err());
    }
}
