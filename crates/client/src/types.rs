//! Client-facing error and state types.

use std::fmt;
use std::time::Duration;

use fl_protocol::{ErrorKind, FlowId, WireError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of a session as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport dropped or the node went silent.
    Disconnected,
    /// WebSocket open and handshake done, login not yet attempted.
    Connecting,
    Authenticated,
    /// Closed by the caller.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Every failure the client surfaces.
///
/// `Connection` invalidates the session. `Permission` and `Operation` are
/// scoped to one request. `FlowFailed` only comes out of a flow handle.
/// Nothing is retried automatically.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ClientError {
    #[error("connection: {0}")]
    Connection(String),
    #[error("authentication: {0}")]
    Authentication(String),
    #[error("permission: {0}")]
    Permission(String),
    #[error("operation: {0}")]
    Operation(String),
    #[error("flow {flow_id} failed: {error}")]
    FlowFailed { flow_id: FlowId, error: WireError },
    /// The local wait elapsed. The remote operation may still complete.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("decode: {0}")]
    Decode(String),
    #[error("config: {0}")]
    Config(String),
}

impl ClientError {
    /// Map a node-reported failure to the caller-facing kind.
    pub fn from_wire(error: WireError) -> Self {
        match error.kind {
            ErrorKind::PermissionDenied => ClientError::Permission(error.message),
            ErrorKind::Unauthenticated => ClientError::Authentication(error.message),
            ErrorKind::UnknownOperation
            | ErrorKind::InvalidArgs
            | ErrorKind::UnknownFlow
            | ErrorKind::Failed => ClientError::Operation(error.message),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::Decode(format!("encoding arguments: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kinds_map_to_client_kinds() {
        let perm = ClientError::from_wire(WireError::new(ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(perm, ClientError::Permission(ref m) if m == "nope"));

        let unknown = ClientError::from_wire(WireError::unknown_operation("frobnicate"));
        assert!(matches!(unknown, ClientError::Operation(ref m) if m.contains("unknown operation")));

        let unauth = ClientError::from_wire(WireError::new(ErrorKind::Unauthenticated, "login first"));
        assert!(matches!(unauth, ClientError::Authentication(_)));
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let err = decode::<u32>(serde_json::json!("seven")).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Authenticated.to_string(), "authenticated");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
