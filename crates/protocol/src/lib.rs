//! Node RPC protocol: WebSocket message types, reply outcomes, flow states,
//! and the catalogue of remote operations.
//!
//! Every frame is a JSON text message tagged by `type`.
//!
//! ```text
//! client                               node
//!   │── client_hello ──────────────────▶│
//!   │◀──────────────────── node_welcome ─│
//!   │── login ─────────────────────────▶│
//!   │◀──── login_accepted | login_rejected
//!   │── invoke / track_flow ───────────▶│
//!   │◀────────────────────────── reply ──│   (correlated by request_id)
//!   │◀──────────────────── flow_update ──│   (pushed, keyed by flow_id)
//!   │◀─────────── ping / pong ─────────▶│
//! ```

pub mod ops;

use std::fmt;

use fl_domain::Credential;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Bumped on any incompatible change to the frames below.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default WebSocket path of the node's RPC endpoint.
pub const RPC_PATH: &str = "/v1/rpc/ws";

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client → Node: first frame on a fresh connection.
    ClientHello {
        protocol_version: u32,
        client_version: String,
    },

    /// Node → Client: handshake accepted.
    NodeWelcome {
        protocol_version: u32,
        node_version: String,
    },

    /// Client → Node: the single authentication attempt of this connection.
    Login { credential: Credential },

    LoginAccepted { session_id: String },

    /// Node → Client: the node closes the socket right after this.
    LoginRejected { reason: String },

    /// Client → Node: call a remote operation.
    Invoke {
        request_id: u64,
        operation: String,
        #[serde(default)]
        args: Value,
    },

    /// Client → Node: report the current state of a flow and push its
    /// completion to this session.
    TrackFlow { request_id: u64, flow_id: FlowId },

    /// Node → Client: outcome of an `invoke` or `track_flow`.
    Reply { request_id: u64, reply: ReplyBody },

    /// Node → Client: a tracked flow changed state.
    FlowUpdate { flow_id: FlowId, state: FlowState },

    Ping { timestamp: i64 },

    Pong { timestamp: i64 },
}

/// What a node answered to a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplyBody {
    /// The operation answered directly.
    Immediate { value: Value },
    /// The operation started a flow; its result arrives via `flow_update`.
    Deferred { flow_id: FlowId },
    Failure { error: WireError },
}

/// Opaque identifier of a server-side flow. Valid across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub Uuid);

impl FlowId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for FlowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a flow. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Pending,
    Completed { value: Value },
    Failed { error: WireError },
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowState::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlowState::Pending => "pending",
            FlowState::Completed { .. } => "completed",
            FlowState::Failed { .. } => "failed",
        }
    }
}

/// Error payload carried by failed replies and failed flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(ErrorKind::UnknownOperation, format!("unknown operation: {operation}"))
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request sent before a successful login.
    Unauthenticated,
    /// The user lacks the permission entry for this operation or flow type.
    PermissionDenied,
    UnknownOperation,
    InvalidArgs,
    UnknownFlow,
    /// The operation or flow ran and failed.
    Failed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::InvalidArgs => "invalid_args",
            ErrorKind::UnknownFlow => "unknown_flow",
            ErrorKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_frame_shape() {
        let msg = WsMessage::Invoke {
            request_id: 7,
            operation: "nodeInfo".into(),
            args: Value::Null,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({ "type": "invoke", "request_id": 7, "operation": "nodeInfo", "args": null })
        );
    }

    #[test]
    fn invoke_without_args_defaults_to_null() {
        let raw = r#"{"type":"invoke","request_id":3,"operation":"registeredFlows"}"#;
        match serde_json::from_str::<WsMessage>(raw).unwrap() {
            WsMessage::Invoke { request_id, args, .. } => {
                assert_eq!(request_id, 3);
                assert_eq!(args, Value::Null);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reply_bodies_are_tagged_by_outcome() {
        let flow_id = FlowId::random();
        let deferred = WsMessage::Reply {
            request_id: 1,
            reply: ReplyBody::Deferred { flow_id },
        };
        let json = serde_json::to_value(&deferred).unwrap();
        assert_eq!(json["type"], "reply");
        assert_eq!(json["reply"]["outcome"], "deferred");
        assert_eq!(json["reply"]["flow_id"], flow_id.to_string());

        let failure = ReplyBody::Failure {
            error: WireError::new(ErrorKind::PermissionDenied, "no"),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json, json!({ "outcome": "failure", "error": { "kind": "permission_denied", "message": "no" } }));
    }

    #[test]
    fn login_frame_carries_credential() {
        let msg = WsMessage::Login {
            credential: Credential::new("user1", "test"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["credential"]["username"], "user1");
        // Debug output of the frame must not leak the secret.
        assert!(!format!("{msg:?}").contains("test\""));
    }

    #[test]
    fn flow_state_terminality() {
        assert!(!FlowState::Pending.is_terminal());
        assert!(FlowState::Completed { value: json!(1) }.is_terminal());
        assert!(FlowState::Failed {
            error: WireError::new(ErrorKind::Failed, "boom")
        }
        .is_terminal());
    }

    #[test]
    fn flow_update_shape() {
        let flow_id = FlowId::random();
        let msg = WsMessage::FlowUpdate {
            flow_id,
            state: FlowState::Completed { value: json!({ "n": 1 }) },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["state"]["status"], "completed");
        assert_eq!(json["state"]["value"]["n"], 1);
    }

    #[test]
    fn flow_id_parses_from_display() {
        let id = FlowId::random();
        let parsed: FlowId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<FlowId>().is_err());
    }

    #[test]
    fn wire_error_display() {
        let err = WireError::unknown_operation("frobnicate");
        assert_eq!(err.to_string(), "unknown_operation: unknown operation: frobnicate");
    }
}
