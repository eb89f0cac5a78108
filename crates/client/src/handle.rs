//! Flow handles: a caller's view of one long-running flow.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use fl_protocol::{FlowId, FlowState, WireError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::{decode, ClientError};

/// Non-blocking view of a flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowPoll<T> {
    Pending,
    Completed(T),
    Failed(WireError),
}

/// Handle on a flow started or tracked through a session.
///
/// Clones share one state cell: every clone and every concurrent waiter
/// observes the same terminal result. The handle stays valid after its
/// session closes, but a flow that had not finished by then is reported as
/// a connection error; reattach from a new session with its [`FlowId`].
pub struct FlowHandle<T = Value> {
    id: FlowId,
    state: watch::Receiver<FlowState>,
    session_closed: CancellationToken,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for FlowHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: self.state.clone(),
            session_closed: self.session_closed.clone(),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FlowHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowHandle")
            .field("id", &self.id)
            .field("state", &self.state.borrow().label())
            .finish()
    }
}

impl FlowHandle<Value> {
    pub(crate) fn new(
        id: FlowId,
        state: watch::Receiver<FlowState>,
        session_closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            state,
            session_closed,
            _output: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> FlowHandle<T> {
    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Reinterpret the result type.
    pub fn cast<U: DeserializeOwned>(self) -> FlowHandle<U> {
        FlowHandle {
            id: self.id,
            state: self.state,
            session_closed: self.session_closed,
            _output: PhantomData,
        }
    }

    /// Current state without waiting.
    pub fn poll_result(&self) -> Result<FlowPoll<T>, ClientError> {
        let state = self.state.borrow().clone();
        match state {
            FlowState::Pending => Ok(FlowPoll::Pending),
            FlowState::Completed { value } => decode(value).map(FlowPoll::Completed),
            FlowState::Failed { error } => Ok(FlowPoll::Failed(error)),
        }
    }

    /// Wait for the flow to finish, optionally bounded by `timeout`.
    ///
    /// A timeout only abandons this wait; the flow keeps running and the
    /// handle can be awaited again.
    pub async fn await_result(&self, timeout: Option<Duration>) -> Result<T, ClientError> {
        let wait = self.wait_terminal();
        let state = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ClientError::Timeout(limit))??,
            None => wait.await?,
        };

        match state {
            FlowState::Completed { value } => decode(value),
            FlowState::Failed { error } => Err(ClientError::FlowFailed {
                flow_id: self.id,
                error,
            }),
            FlowState::Pending => Err(ClientError::Connection(format!(
                "flow {} still pending when its session closed",
                self.id
            ))),
        }
    }

    async fn wait_terminal(&self) -> Result<FlowState, ClientError> {
        let mut state = self.state.clone();
        loop {
            {
                let current = state.borrow_and_update();
                if current.is_terminal() {
                    return Ok(current.clone());
                }
            }

            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        // Cell dropped with the session; keep its last word.
                        let last = state.borrow().clone();
                        return Ok(last);
                    }
                }
                _ = self.session_closed.cancelled() => {
                    let last = state.borrow().clone();
                    if last.is_terminal() {
                        return Ok(last);
                    }
                    return Err(ClientError::Connection(format!(
                        "session closed while waiting for flow {}",
                        self.id
                    )));
                }
            }
        }
    }
}
