//! Dynamic invocation proxy: call any remote operation by name, or through
//! the typed catalogue in [`fl_protocol::ops`].

use std::sync::Arc;

use fl_protocol::ops::{
    Descriptor, FlowType, OperationKind, OperationTable, RemoteOperation, StartFlowArgs, START_FLOW,
};
use fl_protocol::{FlowId, ReplyBody};
use serde_json::Value;

use crate::handle::FlowHandle;
use crate::session::Session;
use crate::types::{decode, encode, ClientError};

/// What an invocation produced.
#[derive(Debug)]
pub enum Invocation {
    /// The node answered with a value.
    Immediate(Value),
    /// The node started a flow; its result comes through the handle.
    Flow(FlowHandle<Value>),
}

impl Invocation {
    pub fn into_value(self) -> Result<Value, ClientError> {
        match self {
            Invocation::Immediate(v) => Ok(v),
            Invocation::Flow(h) => Err(ClientError::Operation(format!(
                "expected an immediate value, node started flow {}",
                h.id()
            ))),
        }
    }

    pub fn into_flow(self) -> Result<FlowHandle<Value>, ClientError> {
        match self {
            Invocation::Flow(h) => Ok(h),
            Invocation::Immediate(_) => Err(ClientError::Operation(
                "expected a flow, node answered immediately".into(),
            )),
        }
    }
}

/// Remote operation proxy bound to one session.
#[derive(Clone)]
pub struct Proxy {
    session: Session,
    table: Arc<OperationTable>,
}

impl Proxy {
    pub fn new(session: Session, table: Arc<OperationTable>) -> Self {
        Self { session, table }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn operations(&self) -> &OperationTable {
        &self.table
    }

    /// Invoke `operation` with JSON `args`.
    ///
    /// Arguments of operations in the table are checked before anything is
    /// sent. Names the table doesn't know are passed through and left for
    /// the node to judge.
    pub async fn invoke(&self, operation: &str, args: Value) -> Result<Invocation, ClientError> {
        let desc = self.check_args(operation, &args)?;
        let reply = self.session.invoke(operation, args).await?;

        // The reply tag decides; the table's kind is only a hint.
        if let Some(desc) = desc {
            let expected_flow = desc.kind == OperationKind::StartsFlow;
            let got_flow = matches!(reply, ReplyBody::Deferred { .. });
            if !matches!(reply, ReplyBody::Failure { .. }) && expected_flow != got_flow {
                tracing::warn!(
                    operation,
                    expected = ?desc.kind,
                    "reply shape differs from the operation table"
                );
            }
        }

        match reply {
            ReplyBody::Immediate { value } => Ok(Invocation::Immediate(value)),
            ReplyBody::Deferred { flow_id } => Ok(Invocation::Flow(self.session.flow_handle(flow_id))),
            ReplyBody::Failure { error } => Err(ClientError::from_wire(error)),
        }
    }

    /// Typed direct call.
    pub async fn call<O: RemoteOperation>(&self, args: &O::Args) -> Result<O::Output, ClientError> {
        let value = self.invoke(O::NAME, encode(args)?).await?.into_value()?;
        serde_json::from_value(value).map_err(|e| {
            let expected = self
                .table
                .operation(O::NAME)
                .map_or(std::any::type_name::<O::Output>(), |d| d.output_type);
            ClientError::Decode(format!("{} result is not a {expected}: {e}", O::NAME))
        })
    }

    /// Start a flow of type `F`.
    pub async fn start_flow<F: FlowType>(&self, args: &F::Args) -> Result<FlowHandle<F::Output>, ClientError> {
        let handle = self.start_flow_dynamic(F::TYPE, encode(args)?).await?;
        Ok(handle.cast())
    }

    /// Start a flow by type name.
    pub async fn start_flow_dynamic(&self, flow_type: &str, args: Value) -> Result<FlowHandle<Value>, ClientError> {
        let start = StartFlowArgs {
            flow_type: flow_type.to_string(),
            args,
        };
        self.invoke(START_FLOW, encode(&start)?).await?.into_flow()
    }

    /// Reattach to a flow by id, possibly started from another session.
    pub async fn track_flow(&self, flow_id: FlowId) -> Result<FlowHandle<Value>, ClientError> {
        self.session.track_flow(flow_id).await
    }

    /// Validate `args` against the table. Returns the operation's entry, if
    /// the table has one.
    fn check_args(&self, operation: &str, args: &Value) -> Result<Option<Descriptor>, ClientError> {
        let Some(desc) = self.table.operation(operation) else {
            return Ok(None);
        };
        desc.validate_args(args).map_err(|e| {
            ClientError::Operation(format!(
                "invalid arguments for {operation}, expected {}: {e}",
                desc.args_type
            ))
        })?;

        if operation == START_FLOW {
            let start: StartFlowArgs = decode(args.clone())?;
            if let Some(flow) = self.table.flow(&start.flow_type) {
                flow.validate_args(&start.args).map_err(|e| {
                    ClientError::Operation(format!(
                        "invalid arguments for flow {}, expected {}: {e}",
                        start.flow_type, flow.args_type
                    ))
                })?;
            }
        }
        Ok(Some(desc))
    }
}
