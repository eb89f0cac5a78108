//! Correlation table shared by callers and the session's reader task.
//!
//! Maps in-flight `request_id`s to their waiting callers and `flow_id`s to
//! the broadcast cell holding the last known flow state. The session keeps
//! it behind a single mutex; every method here is one critical section.
//!
//! A flow cell lives while some handle watches it or its flow is still
//! running. Once a claimed cell is terminal and unwatched it is pruned; a
//! later `track_flow` asks the node again.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use fl_protocol::{FlowId, FlowState, ReplyBody};
use tokio::sync::{oneshot, watch};

use crate::types::ClientError;

pub(crate) type ReplySender = oneshot::Sender<Result<ReplyBody, ClientError>>;

struct FlowCell {
    state: watch::Sender<FlowState>,
    /// A handle has subscribed at least once. Cells registered by a
    /// `deferred` reply stay unclaimed until their caller picks them up.
    claimed: bool,
}

impl FlowCell {
    fn new() -> Self {
        Self {
            state: watch::channel(FlowState::Pending).0,
            claimed: false,
        }
    }

    fn is_stale(&self) -> bool {
        self.claimed && self.state.receiver_count() == 0 && self.state.borrow().is_terminal()
    }
}

#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<u64, ReplySender>,
    flows: HashMap<FlowId, FlowCell>,
    /// Set once the session is gone; later registrations fail with it.
    closed: Option<ClientError>,
}

impl CorrelationTable {
    pub fn register(&mut self, request_id: u64, tx: ReplySender) -> Result<(), ClientError> {
        if let Some(err) = &self.closed {
            return Err(err.clone());
        }
        let prev = self.pending.insert(request_id, tx);
        debug_assert!(prev.is_none(), "request_id reused: {request_id}");
        Ok(())
    }

    /// Hand a reply to its waiter. A `deferred` reply registers its flow
    /// before the waiter wakes, so no `flow_update` can slip past it.
    ///
    /// Returns `false` if nobody was waiting for `request_id`; a late
    /// `deferred` reply then leaves no cell behind.
    pub fn complete(&mut self, request_id: u64, reply: ReplyBody) -> bool {
        let Some(tx) = self.pending.remove(&request_id) else {
            return false;
        };
        let created = match &reply {
            ReplyBody::Deferred { flow_id } => match self.flows.entry(*flow_id) {
                Entry::Occupied(_) => None,
                Entry::Vacant(slot) => {
                    slot.insert(FlowCell::new());
                    Some(*flow_id)
                }
            },
            _ => None,
        };
        if tx.send(Ok(reply)).is_err() {
            if let Some(flow_id) = created {
                self.flows.remove(&flow_id);
            }
        }
        true
    }

    /// Drop a registration whose caller gave up.
    pub fn cancel(&mut self, request_id: u64) {
        self.pending.remove(&request_id);
    }

    pub fn has_flow(&self, flow_id: &FlowId) -> bool {
        self.flows.contains_key(flow_id)
    }

    /// Subscribe to a flow, creating a `Pending` cell if it is new. Sweeps
    /// finished cells nobody watches any more.
    pub fn watch_flow(&mut self, flow_id: FlowId) -> watch::Receiver<FlowState> {
        self.flows.retain(|id, cell| *id == flow_id || !cell.is_stale());
        let cell = self.flows.entry(flow_id).or_insert_with(FlowCell::new);
        cell.claimed = true;
        cell.state.subscribe()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn forget_flow(&mut self, flow_id: &FlowId) {
        self.flows.remove(flow_id);
    }

    /// Apply a state report. Terminal states are sticky: once a flow is
    /// completed or failed, later reports are ignored.
    /// A cell that turns terminal with no handle left is pruned at once.
    pub fn update_flow(&mut self, flow_id: FlowId, state: FlowState) -> bool {
        let Some(cell) = self.flows.get(&flow_id) else {
            return false;
        };
        let changed = cell.state.send_if_modified(move |current| {
            if current.is_terminal() || *current == state {
                return false;
            }
            *current = state;
            true
        });
        if cell.is_stale() {
            self.flows.remove(&flow_id);
        }
        changed
    }

    /// Fail every waiter with `err` and refuse further registrations.
    /// Flow cells are dropped, which wakes their waiters; the receivers keep
    /// the last state they saw.
    ///
    /// Returns how many in-flight requests were failed.
    pub fn close(&mut self, err: ClientError) -> usize {
        if self.closed.is_some() {
            return 0;
        }
        self.closed = Some(err.clone());
        let failed = self.pending.len();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
        self.flows.clear();
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
