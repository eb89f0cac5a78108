//! The client facade: login, a proxy, and typed shortcuts for the standard
//! node operations.

use chrono::{DateTime, Utc};
use fl_domain::Credential;
use fl_protocol::ops::{
    Amount, CashBalance, CashBalanceArgs, CashFlowResult, CashIssue, CashIssueArgs, CashPayment,
    CashPaymentArgs, CurrentNodeTime, FlowInfo, FlowType, NodeInfo, NodeInfoOp, RegisteredFlows,
    RemoteOperation, StateMachinesSnapshot,
};
use fl_protocol::FlowId;
use serde_json::Value;

use crate::builder::ClientBuilder;
use crate::handle::FlowHandle;
use crate::proxy::{Invocation, Proxy};
use crate::session::Session;
use crate::types::{ClientError, ConnectionState};

/// An authenticated connection to one node.
///
/// Dropping the client closes its session, including for any [`Session`]
/// or [`Proxy`] clones taken from it.
pub struct Client {
    proxy: Proxy,
}

impl Client {
    /// Connect to `address` and log in once with default settings.
    pub async fn login(address: &str, credential: &Credential) -> Result<Self, ClientError> {
        ClientBuilder::new(address).login(credential).await
    }

    pub fn builder(address: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(address)
    }

    pub(crate) fn from_proxy(proxy: Proxy) -> Self {
        Self { proxy }
    }

    pub fn session(&self) -> &Session {
        self.proxy.session()
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn state(&self) -> ConnectionState {
        self.proxy.session().state()
    }

    pub fn node_version(&self) -> &str {
        self.proxy.session().node_version()
    }

    pub fn client_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    // ── Generic invocation ───────────────────────────────────────────

    pub async fn invoke(&self, operation: &str, args: Value) -> Result<Invocation, ClientError> {
        self.proxy.invoke(operation, args).await
    }

    pub async fn call<O: RemoteOperation>(&self, args: &O::Args) -> Result<O::Output, ClientError> {
        self.proxy.call::<O>(args).await
    }

    pub async fn start_flow<F: FlowType>(&self, args: &F::Args) -> Result<FlowHandle<F::Output>, ClientError> {
        self.proxy.start_flow::<F>(args).await
    }

    pub async fn start_flow_dynamic(&self, flow_type: &str, args: Value) -> Result<FlowHandle<Value>, ClientError> {
        self.proxy.start_flow_dynamic(flow_type, args).await
    }

    /// Reattach to a flow by id. Works for flows started by any session of
    /// the same node.
    pub async fn flow_handle(&self, flow_id: FlowId) -> Result<FlowHandle<Value>, ClientError> {
        self.proxy.track_flow(flow_id).await
    }

    // ── Standard operations ──────────────────────────────────────────

    pub async fn node_info(&self) -> Result<NodeInfo, ClientError> {
        self.call::<NodeInfoOp>(&()).await
    }

    pub async fn current_node_time(&self) -> Result<DateTime<Utc>, ClientError> {
        self.call::<CurrentNodeTime>(&()).await
    }

    pub async fn registered_flows(&self) -> Result<Vec<String>, ClientError> {
        self.call::<RegisteredFlows>(&()).await
    }

    pub async fn state_machines_snapshot(&self) -> Result<Vec<FlowInfo>, ClientError> {
        self.call::<StateMachinesSnapshot>(&()).await
    }

    pub async fn cash_balance(&self, currency: &str) -> Result<Amount, ClientError> {
        self.call::<CashBalance>(&CashBalanceArgs {
            currency: currency.to_string(),
        })
        .await
    }

    pub async fn start_cash_issue(
        &self,
        amount: Amount,
        issuer_ref: impl Into<String>,
    ) -> Result<FlowHandle<CashFlowResult>, ClientError> {
        self.start_flow::<CashIssue>(&CashIssueArgs {
            amount,
            issuer_ref: issuer_ref.into(),
        })
        .await
    }

    pub async fn start_cash_payment(
        &self,
        amount: Amount,
        recipient: impl Into<String>,
    ) -> Result<FlowHandle<CashFlowResult>, ClientError> {
        self.start_flow::<CashPayment>(&CashPaymentArgs {
            amount,
            recipient: recipient.into(),
        })
        .await
    }

    /// Close the session. Idempotent; in-flight calls and pending flow
    /// waits fail with a connection error.
    pub fn close(&self) {
        self.proxy.session().close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
