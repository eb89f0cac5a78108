//! Transport session: owns the WebSocket, the login exchange, heartbeat
//! liveness, and the reader/writer tasks multiplexing requests over it.
//!
//! # Lifecycle
//!
//! 1. [`Connection::connect`]: open the WebSocket, send `client_hello`,
//!    wait for `node_welcome` (protocol version must match).
//! 2. [`Connection::authenticate`]: consumes the connection, so a login is
//!    attempted at most once per connection. On `login_accepted` the
//!    connection becomes a [`Session`].
//! 3. The session runs three tasks:
//!    - writer: the only place frames are written, fed by an mpsc channel
//!    - reader: correlates `reply` frames and applies `flow_update` pushes
//!    - heartbeat: emits `ping`, and declares the node lost after
//!      `heartbeat_timeout` of silence
//! 4. [`Session::close`] (or dropping the last `Session` clone) fails every
//!    in-flight request and wakes flow waiters with a connection error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fl_domain::config::ClientConfig;
use fl_domain::trace::TraceEvent;
use fl_domain::Credential;
use fl_protocol::{FlowId, FlowState, ReplyBody, WsMessage, PROTOCOL_VERSION};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::correlation::CorrelationTable;
use crate::handle::FlowHandle;
use crate::types::{decode, ClientError, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Timing and size limits of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// `None` waits for replies as long as the session lives.
    pub request_timeout: Option<Duration>,
    pub max_message_bytes: usize,
    /// Reported to the node in `client_hello`.
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            heartbeat_interval: cfg.heartbeat_interval(),
            heartbeat_timeout: cfg.heartbeat_timeout(),
            connect_timeout: cfg.connect_timeout(),
            handshake_timeout: cfg.handshake_timeout(),
            request_timeout: cfg.request_timeout(),
            max_message_bytes: cfg.max_message_bytes,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection (pre-login)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open, handshaken, not yet authenticated connection.
pub struct Connection {
    address: String,
    config: SessionConfig,
    ws: WsStream,
    node_version: String,
}

impl Connection {
    /// Open the WebSocket and complete the hello/welcome handshake.
    pub async fn connect(address: &str, config: SessionConfig) -> Result<Self, ClientError> {
        tracing::info!(address = %address, "connecting to node");

        let (mut ws, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(address))
                .await
                .map_err(|_| ClientError::Connection(format!("connecting to {address} timed out")))?
                .map_err(|e| ClientError::Connection(format!("connecting to {address}: {e}")))?;

        // ── client_hello / node_welcome ─────────────────────────────
        let hello = WsMessage::ClientHello {
            protocol_version: PROTOCOL_VERSION,
            client_version: config.client_version.clone(),
        };
        send_frame(&mut ws, &hello).await?;

        let node_version =
            match read_frame(&mut ws, config.handshake_timeout, config.max_message_bytes).await? {
                WsMessage::NodeWelcome {
                    protocol_version,
                    node_version,
                } if protocol_version == PROTOCOL_VERSION => node_version,
                WsMessage::NodeWelcome {
                    protocol_version, ..
                } => {
                    let _ = ws.close(None).await;
                    return Err(ClientError::Connection(format!(
                        "protocol mismatch: client speaks v{PROTOCOL_VERSION}, node speaks v{protocol_version}"
                    )));
                }
                other => {
                    let _ = ws.close(None).await;
                    return Err(ClientError::Connection(format!(
                        "unexpected {} frame during handshake",
                        frame_name(&other)
                    )));
                }
            };

        tracing::debug!(address = %address, node_version = %node_version, "handshake complete");

        Ok(Self {
            address: address.to_string(),
            config,
            ws,
            node_version,
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::Connecting
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn node_version(&self) -> &str {
        &self.node_version
    }

    /// Present `credential` to the node. Consumes the connection: a
    /// rejected login closes it, and a new attempt needs a new connection.
    pub async fn authenticate(mut self, credential: &Credential) -> Result<Session, ClientError> {
        let login = WsMessage::Login {
            credential: credential.clone(),
        };
        send_frame(&mut self.ws, &login).await?;

        let reply = read_frame(
            &mut self.ws,
            self.config.handshake_timeout,
            self.config.max_message_bytes,
        )
        .await?;

        match reply {
            WsMessage::LoginAccepted { session_id } => {
                TraceEvent::SessionOpened {
                    session_id: session_id.clone(),
                    address: self.address.clone(),
                    username: credential.username().to_string(),
                }
                .emit();
                Ok(Session::start(self, session_id))
            }
            WsMessage::LoginRejected { reason } => {
                tracing::warn!(
                    address = %self.address,
                    username = %credential.username(),
                    reason = %reason,
                    "login rejected"
                );
                let _ = self.ws.close(None).await;
                Err(ClientError::Authentication(reason))
            }
            other => {
                let _ = self.ws.close(None).await;
                Err(ClientError::Connection(format!(
                    "unexpected {} frame in reply to login",
                    frame_name(&other)
                )))
            }
        }
    }

    /// Close without logging in.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session (authenticated)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An authenticated session. Cheap to clone; all clones share one
/// connection. Dropping the last clone closes it.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    _guard: Arc<CloseOnDrop>,
}

struct Shared {
    session_id: String,
    address: String,
    node_version: String,
    config: SessionConfig,
    state: RwLock<ConnectionState>,
    table: Mutex<CorrelationTable>,
    outbound: mpsc::Sender<WsMessage>,
    next_request_id: AtomicU64,
    /// Cancelled when the session leaves `Authenticated`; stops the tasks
    /// and wakes flow waiters.
    lifetime: CancellationToken,
    last_seen: Mutex<Instant>,
}

struct CloseOnDrop(Arc<Shared>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.shutdown(ConnectionState::Closed, "session dropped");
    }
}

impl Session {
    fn start(conn: Connection, session_id: String) -> Self {
        let Connection {
            address,
            config,
            ws,
            node_version,
        } = conn;

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<WsMessage>(64);

        let shared = Arc::new(Shared {
            session_id,
            address,
            node_version,
            config,
            state: RwLock::new(ConnectionState::Authenticated),
            table: Mutex::new(CorrelationTable::default()),
            outbound: outbound_tx,
            next_request_id: AtomicU64::new(1),
            lifetime: CancellationToken::new(),
            last_seen: Mutex::new(Instant::now()),
        });

        tokio::spawn(writer_loop(sink, outbound_rx, shared.clone()));
        tokio::spawn(reader_loop(stream, shared.clone()));
        tokio::spawn(heartbeat_loop(shared.clone()));

        tracing::info!(
            session_id = %shared.session_id,
            address = %shared.address,
            node_version = %shared.node_version,
            "session authenticated"
        );

        Self {
            _guard: Arc::new(CloseOnDrop(shared.clone())),
            shared,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn node_version(&self) -> &str {
        &self.shared.node_version
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.shared
            .shutdown(ConnectionState::Closed, "session closed by caller");
    }

    /// Send one `invoke` and wait for its correlated reply.
    pub(crate) async fn invoke(&self, operation: &str, args: Value) -> Result<ReplyBody, ClientError> {
        let operation_name = operation.to_string();
        self.round_trip(operation, move |request_id| WsMessage::Invoke {
            request_id,
            operation: operation_name,
            args,
        })
        .await
    }

    /// Attach to a flow by id: subscribe locally, then ask the node for
    /// its current state and future updates.
    pub(crate) async fn track_flow(&self, flow_id: FlowId) -> Result<FlowHandle<Value>, ClientError> {
        let (fresh, state) = {
            let mut table = self.shared.table.lock();
            let fresh = !table.has_flow(&flow_id);
            (fresh, table.watch_flow(flow_id))
        };

        let outcome = self
            .round_trip("trackFlow", move |request_id| WsMessage::TrackFlow { request_id, flow_id })
            .await;

        let result = match outcome {
            Ok(ReplyBody::Immediate { value }) => decode::<FlowState>(value).map(|state| {
                self.shared.table.lock().update_flow(flow_id, state);
            }),
            Ok(ReplyBody::Deferred { flow_id: other }) => Err(ClientError::Operation(format!(
                "tracking flow {flow_id} unexpectedly started flow {other}"
            ))),
            Ok(ReplyBody::Failure { error }) => Err(ClientError::from_wire(error)),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(FlowHandle::new(flow_id, state, self.shared.lifetime.clone())),
            Err(e) => {
                drop(state);
                if fresh {
                    self.shared.table.lock().forget_flow(&flow_id);
                }
                Err(e)
            }
        }
    }

    /// A handle on a flow this session already tracks.
    pub(crate) fn flow_handle(&self, flow_id: FlowId) -> FlowHandle<Value> {
        let state = self.shared.table.lock().watch_flow(flow_id);
        FlowHandle::new(flow_id, state, self.shared.lifetime.clone())
    }

    async fn round_trip(
        &self,
        label: &str,
        build: impl FnOnce(u64) -> WsMessage,
    ) -> Result<ReplyBody, ClientError> {
        let state = self.state();
        if state != ConnectionState::Authenticated {
            return Err(ClientError::Connection(format!("session is {state}")));
        }

        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.table.lock().register(request_id, tx)?;

        let started = Instant::now();
        tracing::debug!(
            session_id = %self.shared.session_id,
            request_id,
            operation = %label,
            "sending request"
        );

        if self.shared.outbound.send(build(request_id)).await.is_err() {
            self.shared.table.lock().cancel(request_id);
            return Err(ClientError::Connection("session writer has stopped".into()));
        }

        let waited = match self.shared.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(r) => r,
                Err(_) => {
                    self.shared.table.lock().cancel(request_id);
                    return Err(ClientError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        let result = waited
            .map_err(|_| ClientError::Connection("session closed before the reply arrived".into()))
            .and_then(|r| r);

        TraceEvent::InvocationCompleted {
            session_id: self.shared.session_id.clone(),
            request_id,
            operation: label.to_string(),
            outcome: match &result {
                Ok(ReplyBody::Immediate { .. }) => "immediate".into(),
                Ok(ReplyBody::Deferred { .. }) => "deferred".into(),
                Ok(ReplyBody::Failure { error }) => error.kind.to_string(),
                Err(e) => e.to_string(),
            },
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }
}

impl Shared {
    /// Leave `Authenticated` for `next`. Returns `false` if already closed.
    fn shutdown(&self, next: ConnectionState, reason: &str) -> bool {
        {
            let mut state = self.state.write();
            match (*state, next) {
                (ConnectionState::Closed, _) => return false,
                (ConnectionState::Disconnected, ConnectionState::Disconnected) => return false,
                _ => *state = next,
            }
        }

        let failed = self
            .table
            .lock()
            .close(ClientError::Connection(reason.to_string()));
        self.lifetime.cancel();

        TraceEvent::SessionClosed {
            session_id: self.session_id.clone(),
            reason: reason.to_string(),
            failed_in_flight: failed,
        }
        .emit();
        true
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn dispatch(&self, msg: WsMessage) {
        match msg {
            WsMessage::Reply { request_id, reply } => {
                if !self.table.lock().complete(request_id, reply) {
                    tracing::debug!(
                        session_id = %self.session_id,
                        request_id,
                        "reply for a request nobody awaits"
                    );
                }
            }
            WsMessage::FlowUpdate { flow_id, state } => {
                let label = state.label();
                let mut table = self.table.lock();
                if table.update_flow(flow_id, state) {
                    tracing::debug!(
                        flow_id = %flow_id,
                        state = label,
                        tracked_flows = table.flow_count(),
                        "flow state changed"
                    );
                }
            }
            WsMessage::Ping { timestamp } => {
                let _ = self.outbound.try_send(WsMessage::Pong { timestamp });
            }
            WsMessage::Pong { .. } => {
                tracing::trace!("received pong");
            }
            other => {
                tracing::debug!(
                    session_id = %self.session_id,
                    frame = frame_name(&other),
                    "ignoring unexpected frame"
                );
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn writer_loop(
    mut sink: impl Sink<Message, Error = tungstenite::Error> + Unpin,
    mut outbound_rx: mpsc::Receiver<WsMessage>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = send_frame(&mut sink, &msg).await {
                    shared.shutdown(ConnectionState::Disconnected, &e.to_string());
                    break;
                }
            }
            _ = shared.lifetime.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn reader_loop(
    mut stream: impl Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    shared: Arc<Shared>,
) {
    let max_bytes = shared.config.max_message_bytes;
    let reason = loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = shared.lifetime.cancelled() => return,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                shared.touch();
                // Never drop a frame and carry on: its waiter would hang.
                if text.len() > max_bytes {
                    break format!(
                        "inbound frame of {} bytes exceeds max_message_bytes ({max_bytes})",
                        text.len()
                    );
                }
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(msg) => shared.dispatch(msg),
                    Err(e) => tracing::debug!(error = %e, "failed to parse frame"),
                }
            }
            Some(Ok(Message::Close(_))) => break "node closed the connection".to_string(),
            Some(Ok(_)) => shared.touch(),
            Some(Err(e)) => break format!("transport error: {e}"),
            None => break "connection ended".to_string(),
        }
    };

    tracing::warn!(session_id = %shared.session_id, reason = %reason, "session lost");
    shared.shutdown(ConnectionState::Disconnected, &reason);
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.config.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shared.lifetime.cancelled() => return,
        }

        let silent_for = shared.last_seen.lock().elapsed();
        if silent_for > shared.config.heartbeat_timeout {
            let reason = format!("no traffic from node for {} ms", silent_for.as_millis());
            tracing::warn!(session_id = %shared.session_id, reason = %reason, "heartbeat timeout");
            shared.shutdown(ConnectionState::Disconnected, &reason);
            return;
        }

        let ping = WsMessage::Ping {
            timestamp: Utc::now().timestamp_millis(),
        };
        if shared.outbound.try_send(ping).is_err() {
            tracing::debug!("outbound queue full, skipping ping");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send_frame(
    sink: &mut (impl Sink<Message, Error = tungstenite::Error> + Unpin),
    msg: &WsMessage,
) -> Result<(), ClientError> {
    let json = serde_json::to_string(msg)
        .map_err(|e| ClientError::Decode(format!("encoding {} frame: {e}", frame_name(msg))))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| ClientError::Connection(format!("sending {} frame: {e}", frame_name(msg))))
}

/// Read the next protocol frame during the handshake, skipping WS-level
/// control frames.
async fn read_frame(
    ws: &mut WsStream,
    limit: Duration,
    max_bytes: usize,
) -> Result<WsMessage, ClientError> {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > max_bytes {
                        return Err(ClientError::Connection(format!(
                            "handshake frame of {} bytes exceeds limit",
                            text.len()
                        )));
                    }
                    return serde_json::from_str::<WsMessage>(&text)
                        .map_err(|e| ClientError::Connection(format!("malformed handshake frame: {e}")));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ClientError::Connection(
                        "node closed the connection during handshake".into(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ClientError::Connection(format!("transport error: {e}"))),
            }
        }
    };

    tokio::time::timeout(limit, read)
        .await
        .map_err(|_| ClientError::Connection(format!("no handshake reply within {limit:?}")))?
}

fn frame_name(msg: &WsMessage) -> &'static str {
    match msg {
        WsMessage::ClientHello { .. } => "client_hello",
        WsMessage::NodeWelcome { .. } => "node_welcome",
        WsMessage::Login { .. } => "login",
        WsMessage::LoginAccepted { .. } => "login_accepted",
        WsMessage::LoginRejected { .. } => "login_rejected",
        WsMessage::Invoke { .. } => "invoke",
        WsMessage::TrackFlow { .. } => "track_flow",
        WsMessage::Reply { .. } => "reply",
        WsMessage::FlowUpdate { .. } => "flow_update",
        WsMessage::Ping { .. } => "ping",
        WsMessage::Pong { .. } => "pong",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_follows_client_config() {
        let cfg = ClientConfig {
            heartbeat_interval_secs: 2,
            heartbeat_timeout_secs: 7,
            request_timeout_secs: 0,
            ..ClientConfig::default()
        };
        let session_cfg = SessionConfig::from(&cfg);
        assert_eq!(session_cfg.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(session_cfg.heartbeat_timeout, Duration::from_secs(7));
        assert!(session_cfg.request_timeout.is_none());
        assert_eq!(session_cfg.client_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn frame_names_match_wire_tags() {
        let ping = WsMessage::Ping { timestamp: 1 };
        let json = serde_json::to_value(&ping).unwrap();
        assert_eq!(json["type"], frame_name(&ping));

        let track = WsMessage::TrackFlow {
            request_id: 1,
            flow_id: FlowId::random(),
        };
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["type"], frame_name(&track));
    }
}
