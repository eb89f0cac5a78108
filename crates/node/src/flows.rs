//! Flow execution and the store every session tracks flows through.
//!
//! A flow runs on its own task, independent of the session that started
//! it. Its state lives in a `watch` cell owned by the store, so any number
//! of sessions can subscribe to it, before or after it finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use fl_domain::trace::TraceEvent;
use fl_protocol::ops::FlowInfo;
use fl_protocol::{ErrorKind, FlowId, FlowState, WireError};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

/// Context handed to a running flow.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub flow_id: FlowId,
    /// User that started the flow.
    pub initiator: String,
    /// Cancelled when the node shuts down.
    pub cancel: CancellationToken,
}

/// Implement this trait to add a flow type.
#[async_trait::async_trait]
pub trait FlowLogic: Send + Sync + 'static {
    async fn run(&self, ctx: FlowContext, args: Value) -> Result<Value, WireError>;
}

struct FlowRecord {
    flow_type: String,
    started_at: DateTime<Utc>,
    state: watch::Sender<FlowState>,
}

pub struct FlowStore {
    logic: HashMap<String, Arc<dyn FlowLogic>>,
    records: RwLock<HashMap<FlowId, FlowRecord>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl FlowStore {
    pub fn new(max_concurrent: usize, shutdown: CancellationToken) -> Self {
        Self {
            logic: HashMap::new(),
            records: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            shutdown,
        }
    }

    pub fn register<F: FlowLogic>(&mut self, flow_type: impl Into<String>, logic: F) -> &mut Self {
        self.logic.insert(flow_type.into(), Arc::new(logic));
        self
    }

    pub fn has_type(&self, flow_type: &str) -> bool {
        self.logic.contains_key(flow_type)
    }

    pub fn flow_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.logic.keys().cloned().collect();
        types.sort();
        types
    }

    /// Start a flow and return its id with a subscription to its state.
    /// Runs beyond `max_concurrent_flows` wait for a permit while pending.
    pub fn start(
        &self,
        flow_type: &str,
        args: Value,
        initiator: &str,
    ) -> Result<(FlowId, watch::Receiver<FlowState>), WireError> {
        let logic = self.logic.get(flow_type).cloned().ok_or_else(|| {
            WireError::new(ErrorKind::UnknownOperation, format!("unknown flow type: {flow_type}"))
        })?;

        let flow_id = FlowId::random();
        let (tx, rx) = watch::channel(FlowState::Pending);
        self.records.write().insert(
            flow_id,
            FlowRecord {
                flow_type: flow_type.to_string(),
                started_at: Utc::now(),
                state: tx.clone(),
            },
        );

        TraceEvent::FlowStarted {
            flow_id: flow_id.to_string(),
            flow_type: flow_type.to_string(),
        }
        .emit();

        let ctx = FlowContext {
            flow_id,
            initiator: initiator.to_string(),
            cancel: self.shutdown.child_token(),
        };
        let permits = self.permits.clone();
        let flow_type = flow_type.to_string();

        tokio::spawn(async move {
            let started = Instant::now();
            let cancel = ctx.cancel.clone();

            let outcome = tokio::select! {
                outcome = async {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| WireError::new(ErrorKind::Failed, "flow executor closed"))?;
                    logic.run(ctx, args).await
                } => outcome,
                _ = cancel.cancelled() => Err(WireError::new(ErrorKind::Failed, "node shutting down")),
            };

            let state = match outcome {
                Ok(value) => FlowState::Completed { value },
                Err(error) => FlowState::Failed { error },
            };
            let label = state.label();
            if let FlowState::Failed { error } = &state {
                tracing::warn!(flow_id = %flow_id, flow_type = %flow_type, error = %error, "flow failed");
            }

            tx.send_if_modified(|current| {
                if current.is_terminal() {
                    return false;
                }
                *current = state;
                true
            });

            TraceEvent::FlowFinished {
                flow_id: flow_id.to_string(),
                flow_type,
                outcome: label.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            }
            .emit();
        });

        Ok((flow_id, rx))
    }

    /// Subscribe to an existing flow. Returns its type too, for permission
    /// checks.
    pub fn track(&self, flow_id: &FlowId) -> Option<(String, watch::Receiver<FlowState>)> {
        self.records
            .read()
            .get(flow_id)
            .map(|r| (r.flow_type.clone(), r.state.subscribe()))
    }

    pub fn snapshot(&self) -> Vec<FlowInfo> {
        let mut flows: Vec<FlowInfo> = self
            .records
            .read()
            .iter()
            .map(|(id, r)| FlowInfo {
                flow_id: *id,
                flow_type: r.flow_type.clone(),
                status: r.state.borrow().label().to_string(),
                started_at: r.started_at,
            })
            .collect();
        flows.sort_by_key(|f| f.started_at);
        flows
    }
}
