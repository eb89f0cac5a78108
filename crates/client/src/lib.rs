//! `fl-client`: authenticated RPC client for flowlink nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your application                                         │
//! │                                                           │
//! │   let client = Client::login(url, &credential).await?;    │
//! │   let info = client.node_info().await?;                   │
//! │   let flow = client                                       │
//! │       .start_cash_issue(Amount::dollars(123), "1")        │
//! │       .await?;                                            │
//! │   let result = flow.await_result(None).await?;            │
//! └──────────────┬────────────────────────────────────────────┘
//!                │ Proxy (operation table, argument checks)
//!                ▼
//!          Session ── writer task ──▶ node
//!                  ◀── reader task ── (reply / flow_update / pong)
//!                  ── heartbeat task (ping, liveness)
//! ```
//!
//! # Connection flow
//!
//! 1. Connect WS, send `client_hello`, wait for `node_welcome`
//! 2. Send one `login`; a rejection ends the connection
//! 3. Requests carry a `request_id`; replies may arrive in any order
//! 4. Flow results are pushed as `flow_update` and fan out to every
//!    [`FlowHandle`] clone
//! 5. Losing the node fails in-flight calls with
//!    [`ClientError::Connection`]; nothing reconnects on its own
//!
//! # Permissions
//!
//! The node checks `InvokeOperation:<name>` for direct calls and
//! `StartProcess:<flow type>` for starting or tracking flows (`ALL`
//! grants everything). Denials come back as [`ClientError::Permission`]
//! and leave the session usable.

pub mod builder;
pub mod client;
mod correlation;
pub mod handle;
pub mod proxy;
pub mod retry;
pub mod session;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ClientBuilder;
pub use client::Client;
pub use handle::{FlowHandle, FlowPoll};
pub use proxy::{Invocation, Proxy};
pub use retry::{Backoff, RetryPolicy};
pub use session::{Connection, Session, SessionConfig};
pub use types::{ClientError, ConnectionState};

pub use fl_domain::Credential;
pub use fl_protocol::ops::{self, Amount, CashFlowResult, FlowInfo, NodeInfo};
pub use fl_protocol::{FlowId, WireError};
