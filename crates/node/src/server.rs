//! WebSocket endpoint for RPC clients.
//!
//! Flow:
//! 1. Client connects to `/v1/rpc/ws` and sends `client_hello`
//! 2. Node answers `node_welcome`; a protocol mismatch closes the socket
//! 3. Client sends exactly one `login`; the node answers `login_accepted`
//!    or `login_rejected` and closes
//! 4. Message loop: `invoke` / `track_flow` are served concurrently and
//!    answered with `reply`; flow results are pushed as `flow_update`

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use fl_domain::permission;
use fl_domain::trace::TraceEvent;
use fl_protocol::ops::{StartFlowArgs, START_FLOW};
use fl_protocol::{ErrorKind, FlowId, FlowState, ReplyBody, WireError, WsMessage, PROTOCOL_VERSION};

use crate::auth::Principal;
use crate::handlers::{parse_args, CallContext};
use crate::state::NodeState;

/// GET /v1/rpc/ws: upgrade to WebSocket.
pub async fn rpc_ws(ws: WebSocketUpgrade, State(state): State<Arc<NodeState>>) -> impl IntoResponse {
    let max = state.config.server.max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-connection context shared by request tasks.
#[derive(Clone)]
struct Conn {
    state: Arc<NodeState>,
    principal: Principal,
    session_id: String,
    outbound: mpsc::Sender<WsMessage>,
    /// Cancelled when this connection ends; stops flow forwarders.
    closed: CancellationToken,
}

async fn handle_socket(socket: WebSocket, state: Arc<NodeState>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let login_timeout = std::time::Duration::from_secs(state.config.server.login_timeout_secs);

    // 1. client_hello → node_welcome.
    let hello = tokio::time::timeout(login_timeout, next_frame(&mut ws_stream)).await;
    let client_version = match hello {
        Ok(Some(WsMessage::ClientHello {
            protocol_version,
            client_version,
        })) => {
            let welcome = WsMessage::NodeWelcome {
                protocol_version: PROTOCOL_VERSION,
                node_version: env!("CARGO_PKG_VERSION").to_string(),
            };
            if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
                return;
            }
            if protocol_version != PROTOCOL_VERSION {
                tracing::warn!(
                    client_protocol = protocol_version,
                    node_protocol = PROTOCOL_VERSION,
                    "protocol mismatch, closing"
                );
                let _ = ws_sink.close().await;
                return;
            }
            client_version
        }
        Ok(_) | Err(_) => {
            tracing::debug!("client did not send client_hello");
            let _ = ws_sink.close().await;
            return;
        }
    };

    // 2. Exactly one login.
    let login = tokio::time::timeout(login_timeout, next_frame(&mut ws_stream)).await;
    let principal = match login {
        Ok(Some(WsMessage::Login { credential })) => match state.users.authenticate(&credential) {
            Some(principal) => principal,
            None => {
                TraceEvent::LoginRejected {
                    username: credential.username().to_string(),
                    reason: "invalid credentials".into(),
                }
                .emit();
                reject(&mut ws_sink, "invalid credentials").await;
                return;
            }
        },
        Ok(Some(_)) => {
            reject(&mut ws_sink, "expected login").await;
            return;
        }
        Ok(None) | Err(_) => {
            tracing::debug!("client did not log in");
            let _ = ws_sink.close().await;
            return;
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let accepted = WsMessage::LoginAccepted {
        session_id: session_id.clone(),
    };
    if send_ws_message(&mut ws_sink, &accepted).await.is_err() {
        return;
    }

    tracing::info!(
        session_id = %session_id,
        username = %principal.username,
        client_version = %client_version,
        "client logged in"
    );

    // 3. Outbound channel + writer task.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(64);
    let closed = state.shutdown.child_token();

    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                        break;
                    }
                }
                _ = writer_closed.cancelled() => {
                    let _ = ws_sink.close().await;
                    break;
                }
            }
        }
    });

    let conn = Conn {
        state: state.clone(),
        principal,
        session_id: session_id.clone(),
        outbound: outbound_tx,
        closed: closed.clone(),
    };

    // 4. Reader loop.
    loop {
        let next = tokio::select! {
            next = ws_stream.next() => next,
            _ = closed.cancelled() => break,
        };
        let Some(Ok(msg)) = next else { break };

        match msg {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(ws_msg) => handle_inbound(&conn, ws_msg).await,
                Err(e) => tracing::debug!(session_id = %session_id, error = %e, "ignoring unparseable message"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup: stop forwarders and the writer.
    closed.cancel();
    let _ = writer.await;
    tracing::info!(session_id = %session_id, "client disconnected");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_inbound(conn: &Conn, msg: WsMessage) {
    match msg {
        WsMessage::Invoke {
            request_id,
            operation,
            args,
        } => {
            let conn = conn.clone();
            tokio::spawn(async move {
                if operation == START_FLOW {
                    start_flow(&conn, request_id, args).await;
                } else {
                    let reply = invoke(&conn, &operation, args).await;
                    conn.reply(request_id, reply).await;
                }
            });
        }
        WsMessage::TrackFlow {
            request_id,
            flow_id,
        } => {
            track_flow(conn, request_id, flow_id).await;
        }
        WsMessage::Ping { timestamp } => {
            let _ = conn.outbound.send(WsMessage::Pong { timestamp }).await;
        }
        WsMessage::Pong { .. } => {}
        WsMessage::Login { .. } => {
            tracing::warn!(session_id = %conn.session_id, "second login on an authenticated connection, ignoring");
        }
        other => {
            tracing::debug!(
                session_id = %conn.session_id,
                msg_type = ?std::mem::discriminant(&other),
                "unexpected inbound message type"
            );
        }
    }
}

async fn invoke(conn: &Conn, operation: &str, args: serde_json::Value) -> ReplyBody {
    let Some(handler) = conn.state.handlers.get(operation) else {
        return failure(WireError::unknown_operation(operation));
    };
    if !conn.principal.permissions.allows_operation(operation) {
        return failure(denied(&conn.principal, &permission::invoke_operation(operation)));
    }

    let ctx = CallContext {
        session_id: conn.session_id.clone(),
        username: conn.principal.username.clone(),
    };
    match handler.call(ctx, args).await {
        Ok(value) => ReplyBody::Immediate { value },
        Err(error) => failure(error),
    }
}

async fn start_flow(conn: &Conn, request_id: u64, args: serde_json::Value) {
    let start: StartFlowArgs = match parse_args(args) {
        Ok(s) => s,
        Err(e) => return conn.reply(request_id, failure(e)).await,
    };
    if !conn.state.flows.has_type(&start.flow_type) {
        let err = WireError::new(
            ErrorKind::UnknownOperation,
            format!("unknown flow type: {}", start.flow_type),
        );
        return conn.reply(request_id, failure(err)).await;
    }
    if !conn.principal.permissions.allows_flow(&start.flow_type) {
        let err = denied(&conn.principal, &permission::start_process(&start.flow_type));
        return conn.reply(request_id, failure(err)).await;
    }

    match conn
        .state
        .flows
        .start(&start.flow_type, start.args, &conn.principal.username)
    {
        Ok((flow_id, state)) => {
            tracing::debug!(
                session_id = %conn.session_id,
                flow_id = %flow_id,
                flow_type = %start.flow_type,
                "flow started"
            );
            // The deferred reply must reach the client before any update.
            conn.reply(request_id, ReplyBody::Deferred { flow_id }).await;
            conn.forward_completion(flow_id, state);
        }
        Err(e) => conn.reply(request_id, failure(e)).await,
    }
}

async fn track_flow(conn: &Conn, request_id: u64, flow_id: FlowId) {
    let Some((flow_type, state)) = conn.state.flows.track(&flow_id) else {
        let err = WireError::new(ErrorKind::UnknownFlow, format!("unknown flow: {flow_id}"));
        return conn.reply(request_id, failure(err)).await;
    };
    if !conn.principal.permissions.allows_flow(&flow_type) {
        let err = denied(&conn.principal, &permission::start_process(&flow_type));
        return conn.reply(request_id, failure(err)).await;
    }

    let current = state.borrow().clone();
    let reply = match serde_json::to_value(&current) {
        Ok(value) => ReplyBody::Immediate { value },
        Err(e) => failure(WireError::new(ErrorKind::Failed, e.to_string())),
    };
    conn.reply(request_id, reply).await;
    if !current.is_terminal() {
        conn.forward_completion(flow_id, state);
    }
}

impl Conn {
    async fn reply(&self, request_id: u64, reply: ReplyBody) {
        if let ReplyBody::Failure { error } = &reply {
            tracing::debug!(
                session_id = %self.session_id,
                request_id,
                error = %error,
                "request failed"
            );
        }
        let _ = self
            .outbound
            .send(WsMessage::Reply { request_id, reply })
            .await;
    }

    /// Push the flow's terminal state to this connection once it lands.
    fn forward_completion(&self, flow_id: FlowId, mut state: watch::Receiver<FlowState>) {
        let outbound = self.outbound.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            let wait = async { state.wait_for(|s| s.is_terminal()).await.map(|s| s.clone()) };
            let terminal = tokio::select! {
                res = wait => match res {
                    Ok(s) => s,
                    Err(_) => return,
                },
                _ = closed.cancelled() => return,
            };
            let _ = outbound
                .send(WsMessage::FlowUpdate {
                    flow_id,
                    state: terminal,
                })
                .await;
        });
    }
}

fn failure(error: WireError) -> ReplyBody {
    ReplyBody::Failure { error }
}

fn denied(principal: &Principal, required: &str) -> WireError {
    WireError::new(
        ErrorKind::PermissionDenied,
        format!("user {} lacks permission {required}", principal.username),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Next protocol frame, skipping WS-level control frames. `None` when the
/// socket ends or sends garbage.
async fn next_frame(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<WsMessage> {
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => return serde_json::from_str::<WsMessage>(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn reject(sink: &mut (impl SinkExt<Message> + Unpin), reason: &str) {
    let msg = WsMessage::LoginRejected {
        reason: reason.to_string(),
    };
    let _ = send_ws_message(sink, &msg).await;
    let _ = sink.close().await;
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &WsMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
