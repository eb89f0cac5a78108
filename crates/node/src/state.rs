use std::sync::Arc;
use std::time::Duration;

use fl_domain::config::NodeConfig;
use fl_domain::Result;
use fl_protocol::ops::{
    CashBalance, CashIssue, CashPayment, CurrentNodeTime, FlowType, NodeInfo, NodeInfoOp,
    RegisteredFlows, RemoteOperation, StateMachinesSnapshot,
};
use tokio_util::sync::CancellationToken;

use crate::auth::UserStore;
use crate::cash::{CashBalanceHandler, CashIssueFlow, CashPaymentFlow, Vault};
use crate::flows::FlowStore;
use crate::handlers::{
    CurrentNodeTimeHandler, HandlerRegistry, NodeInfoHandler, RegisteredFlowsHandler,
    StateMachinesSnapshotHandler,
};

/// Everything a connection handler needs.
pub struct NodeState {
    pub config: NodeConfig,
    pub users: UserStore,
    pub handlers: HandlerRegistry,
    pub flows: Arc<FlowStore>,
    pub vault: Arc<Vault>,
    /// Cancelled on node shutdown; connections and flows watch it.
    pub shutdown: CancellationToken,
}

impl NodeState {
    pub fn build(config: NodeConfig, shutdown: CancellationToken) -> Result<Self> {
        let users = UserStore::from_config(&config.users)?;
        let vault = Arc::new(Vault::new());

        let mut flows = FlowStore::new(config.flows.max_concurrent_flows, shutdown.clone());
        flows
            .register(
                CashIssue::TYPE,
                CashIssueFlow {
                    vault: vault.clone(),
                    delay: Duration::from_millis(config.flows.cash_issue_delay_ms),
                },
            )
            .register(
                CashPayment::TYPE,
                CashPaymentFlow {
                    vault: vault.clone(),
                },
            );
        let flows = Arc::new(flows);

        let mut handlers = HandlerRegistry::new();
        handlers
            .register(
                NodeInfoOp::NAME,
                NodeInfoHandler {
                    info: NodeInfo {
                        legal_name: config.identity.legal_name.clone(),
                        platform_version: config.identity.platform_version,
                        node_version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                },
            )
            .register(CurrentNodeTime::NAME, CurrentNodeTimeHandler)
            .register(
                RegisteredFlows::NAME,
                RegisteredFlowsHandler {
                    flows: flows.clone(),
                },
            )
            .register(
                StateMachinesSnapshot::NAME,
                StateMachinesSnapshotHandler {
                    flows: flows.clone(),
                },
            )
            .register(
                CashBalance::NAME,
                CashBalanceHandler {
                    vault: vault.clone(),
                },
            );

        tracing::debug!(
            users = users.len(),
            operations = ?handlers.names(),
            flows = ?flows.flow_types(),
            "node state built"
        );

        Ok(Self {
            config,
            users,
            handlers,
            flows,
            vault,
            shutdown,
        })
    }
}
