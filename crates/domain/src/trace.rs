use serde::Serialize;

/// Structured lifecycle events emitted by the client and the node.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionOpened {
        session_id: String,
        address: String,
        username: String,
    },
    SessionClosed {
        session_id: String,
        reason: String,
        failed_in_flight: usize,
    },
    LoginRejected {
        username: String,
        reason: String,
    },
    InvocationCompleted {
        session_id: String,
        request_id: u64,
        operation: String,
        outcome: String,
        duration_ms: u64,
    },
    FlowStarted {
        flow_id: String,
        flow_type: String,
    },
    FlowFinished {
        flow_id: String,
        flow_type: String,
        outcome: String,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "fl_event");
    }
}
