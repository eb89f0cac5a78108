//! The node's remote operation surface as an explicit table.
//!
//! Each direct operation is a type implementing [`RemoteOperation`]; each
//! flow type implements [`FlowType`]. [`OperationTable`] maps names to
//! descriptors so the client can validate arguments before they hit the
//! wire and decode results into the right Rust type.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FlowId;

/// Name of the single process-starting operation. The flow type travels in
/// [`StartFlowArgs`].
pub const START_FLOW: &str = "startFlow";

/// A direct operation: the node answers with a value.
pub trait RemoteOperation {
    const NAME: &'static str;
    type Args: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;
}

/// A long-running flow started through [`START_FLOW`].
pub trait FlowType {
    const TYPE: &'static str;
    type Args: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartFlowArgs {
    pub flow_type: String,
    #[serde(default)]
    pub args: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Expected to answer `immediate`.
    Query,
    /// Expected to answer `deferred`.
    StartsFlow,
}

/// Schema entry for one operation or flow type.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub kind: OperationKind,
    pub args_type: &'static str,
    pub output_type: &'static str,
    check_args: fn(&Value) -> Result<(), serde_json::Error>,
}

impl Descriptor {
    /// Check that `args` deserializes into this entry's argument type.
    pub fn validate_args(&self, args: &Value) -> Result<(), serde_json::Error> {
        (self.check_args)(args)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args_type", &self.args_type)
            .field("output_type", &self.output_type)
            .finish()
    }
}

fn check_deserializes<T: DeserializeOwned>(args: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(args).map(|_| ())
}

/// Name → descriptor mapping for operations and flow types.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    operations: BTreeMap<&'static str, Descriptor>,
    flows: BTreeMap<&'static str, Descriptor>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The operations and flows every flowlink node serves.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register::<NodeInfoOp>();
        table.register::<CurrentNodeTime>();
        table.register::<RegisteredFlows>();
        table.register::<StateMachinesSnapshot>();
        table.register::<CashBalance>();
        table.register_flow::<CashIssue>();
        table.register_flow::<CashPayment>();
        table
    }

    pub fn register<O: RemoteOperation>(&mut self) -> &mut Self {
        self.operations.insert(
            O::NAME,
            Descriptor {
                name: O::NAME,
                kind: OperationKind::Query,
                args_type: type_name::<O::Args>(),
                output_type: type_name::<O::Output>(),
                check_args: check_deserializes::<O::Args>,
            },
        );
        self
    }

    pub fn register_flow<F: FlowType>(&mut self) -> &mut Self {
        self.flows.insert(
            F::TYPE,
            Descriptor {
                name: F::TYPE,
                kind: OperationKind::StartsFlow,
                args_type: type_name::<F::Args>(),
                output_type: type_name::<F::Output>(),
                check_args: check_deserializes::<F::Args>,
            },
        );
        self
    }

    /// Look up a direct operation. `startFlow` resolves to a synthetic
    /// descriptor validating [`StartFlowArgs`].
    pub fn operation(&self, name: &str) -> Option<Descriptor> {
        if name == START_FLOW {
            return Some(Descriptor {
                name: START_FLOW,
                kind: OperationKind::StartsFlow,
                args_type: type_name::<StartFlowArgs>(),
                output_type: type_name::<FlowId>(),
                check_args: check_deserializes::<StartFlowArgs>,
            });
        }
        self.operations.get(name).copied()
    }

    pub fn flow(&self, flow_type: &str) -> Option<Descriptor> {
        self.flows.get(flow_type).copied()
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }

    pub fn flow_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.flows.keys().copied()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A quantity of a currency, in whole units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub quantity: i64,
    pub currency: String,
}

impl Amount {
    pub fn new(quantity: i64, currency: impl Into<String>) -> Self {
        Self {
            quantity,
            currency: currency.into(),
        }
    }

    pub fn dollars(quantity: i64) -> Self {
        Self::new(quantity, "USD")
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub legal_name: String,
    pub platform_version: u32,
    pub node_version: String,
}

/// A flow as listed by `stateMachinesSnapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInfo {
    pub flow_id: FlowId,
    pub flow_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashBalanceArgs {
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashIssueArgs {
    pub amount: Amount,
    /// Issuer reference recorded with the issuance.
    pub issuer_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashPaymentArgs {
    pub amount: Amount,
    pub recipient: String,
}

/// Result of both cash flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowResult {
    pub amount: Amount,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

pub struct NodeInfoOp;

impl RemoteOperation for NodeInfoOp {
    const NAME: &'static str = "nodeInfo";
    type Args = ();
    type Output = NodeInfo;
}

pub struct CurrentNodeTime;

impl RemoteOperation for CurrentNodeTime {
    const NAME: &'static str = "currentNodeTime";
    type Args = ();
    type Output = DateTime<Utc>;
}

pub struct RegisteredFlows;

impl RemoteOperation for RegisteredFlows {
    const NAME: &'static str = "registeredFlows";
    type Args = ();
    type Output = Vec<String>;
}

pub struct StateMachinesSnapshot;

impl RemoteOperation for StateMachinesSnapshot {
    const NAME: &'static str = "stateMachinesSnapshot";
    type Args = ();
    type Output = Vec<FlowInfo>;
}

pub struct CashBalance;

impl RemoteOperation for CashBalance {
    const NAME: &'static str = "cashBalance";
    type Args = CashBalanceArgs;
    type Output = Amount;
}

pub struct CashIssue;

impl FlowType for CashIssue {
    const TYPE: &'static str = "CashIssue";
    type Args = CashIssueArgs;
    type Output = CashFlowResult;
}

pub struct CashPayment;

impl FlowType for CashPayment {
    const TYPE: &'static str = "CashPayment";
    type Args = CashPaymentArgs;
    type Output = CashFlowResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standard_table_lists_catalogue() {
        let table = OperationTable::standard();
        let ops: Vec<_> = table.operation_names().collect();
        assert_eq!(
            ops,
            ["cashBalance", "currentNodeTime", "nodeInfo", "registeredFlows", "stateMachinesSnapshot"]
        );
        let flows: Vec<_> = table.flow_types().collect();
        assert_eq!(flows, ["CashIssue", "CashPayment"]);
    }

    #[test]
    fn unit_args_accept_null_only() {
        let desc = OperationTable::standard().operation("nodeInfo").unwrap();
        assert_eq!(desc.kind, OperationKind::Query);
        assert!(desc.validate_args(&Value::Null).is_ok());
        assert!(desc.validate_args(&json!({ "x": 1 })).is_err());
    }

    #[test]
    fn flow_args_are_checked() {
        let desc = OperationTable::standard().flow("CashIssue").unwrap();
        assert!(desc
            .validate_args(&json!({ "amount": { "quantity": 5, "currency": "USD" }, "issuer_ref": "1" }))
            .is_ok());
        assert!(desc.validate_args(&json!({ "amount": 5 })).is_err());
    }

    #[test]
    fn start_flow_is_always_known() {
        let table = OperationTable::new();
        let desc = table.operation(START_FLOW).unwrap();
        assert_eq!(desc.kind, OperationKind::StartsFlow);
        assert!(desc.validate_args(&json!({ "flow_type": "Anything" })).is_ok());
        assert!(desc.validate_args(&json!({ "args": {} })).is_err());
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let table = OperationTable::standard();
        assert!(table.operation("vaultTrack").is_none());
        assert!(table.flow("CashExit").is_none());
    }

    #[test]
    fn kinds_split_queries_from_flows() {
        let table = OperationTable::standard();
        for name in table.operation_names() {
            let desc = table.operation(name).unwrap();
            assert_eq!(desc.name, name);
            assert_eq!(desc.kind, OperationKind::Query, "{name}");
        }
        for flow_type in table.flow_types() {
            let desc = table.flow(flow_type).unwrap();
            assert_eq!(desc.kind, OperationKind::StartsFlow, "{flow_type}");
            assert!(desc.output_type.ends_with("CashFlowResult"), "{}", desc.output_type);
        }
    }

    #[test]
    fn descriptor_records_type_names() {
        let desc = OperationTable::standard().operation("cashBalance").unwrap();
        assert!(desc.args_type.ends_with("CashBalanceArgs"));
        assert!(desc.output_type.ends_with("Amount"));
    }
}
