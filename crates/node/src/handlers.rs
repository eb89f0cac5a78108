//! Direct operation handlers and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fl_protocol::ops::{
    CurrentNodeTime, NodeInfo, NodeInfoOp, RegisteredFlows, RemoteOperation, StateMachinesSnapshot,
};
use fl_protocol::{ErrorKind, WireError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::flows::FlowStore;

/// Who is calling.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: String,
    pub username: String,
}

pub type HandlerResult = Result<Value, WireError>;

/// Implement this trait to serve a direct (immediate) operation.
#[async_trait::async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, args: Value) -> HandlerResult;
}

/// Operation name → handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are matched exactly.
    pub fn register<H: OperationHandler>(&mut self, name: impl Into<String>, handler: H) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Deserialize handler arguments, reporting `invalid_args` on mismatch.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, WireError> {
    serde_json::from_value(args).map_err(|e| WireError::new(ErrorKind::InvalidArgs, e.to_string()))
}

pub fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| WireError::new(ErrorKind::Failed, e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NodeInfoHandler {
    pub info: NodeInfo,
}

#[async_trait::async_trait]
impl OperationHandler for NodeInfoHandler {
    async fn call(&self, _ctx: CallContext, args: Value) -> HandlerResult {
        parse_args::<<NodeInfoOp as RemoteOperation>::Args>(args)?;
        to_result(&self.info)
    }
}

pub struct CurrentNodeTimeHandler;

#[async_trait::async_trait]
impl OperationHandler for CurrentNodeTimeHandler {
    async fn call(&self, _ctx: CallContext, args: Value) -> HandlerResult {
        parse_args::<<CurrentNodeTime as RemoteOperation>::Args>(args)?;
        to_result(&Utc::now())
    }
}

pub struct RegisteredFlowsHandler {
    pub flows: Arc<FlowStore>,
}

#[async_trait::async_trait]
impl OperationHandler for RegisteredFlowsHandler {
    async fn call(&self, _ctx: CallContext, args: Value) -> HandlerResult {
        parse_args::<<RegisteredFlows as RemoteOperation>::Args>(args)?;
        to_result(&self.flows.flow_types())
    }
}

pub struct StateMachinesSnapshotHandler {
    pub flows: Arc<FlowStore>,
}

#[async_trait::async_trait]
impl OperationHandler for StateMachinesSnapshotHandler {
    async fn call(&self, _ctx: CallContext, args: Value) -> HandlerResult {
        parse_args::<<StateMachinesSnapshot as RemoteOperation>::Args>(args)?;
        to_result(&self.flows.snapshot())
    }
}
