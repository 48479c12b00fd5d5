//! Pending cross-node requests and their accumulators.
//!
//! ```text
//! PENDING ──all responses──────▶ RESOLVED
//!    │ ───existence found early─▶ SHORT_CIRCUITED
//!    └─────deadline elapsed─────▶ TIMED_OUT
//! ```
//!
//! An entry leaves the table on its terminal transition, or when the caller
//! waiting on it goes away (see [`PendingGuard`]). Responses for ids that are
//! not in the table are dropped, so nothing can resolve twice.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};

use crate::domain::{AppId, RequestOutcome, RequestType, SocketId, SocketInfo};

use super::wire::ResponsePayload;

/// Running result of a request, seeded with the local answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sockets(HashMap<SocketId, SocketInfo>),
    Channels(HashMap<String, HashSet<SocketId>>),
    ChannelCounts(HashMap<String, usize>),
    Members(HashMap<String, Value>),
    Count(usize),
    Exists(bool),
}

/// A payload whose shape does not fit the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("response payload does not match the pending request")]
pub struct PayloadMismatch;

impl Accumulator {
    /// Folds a peer's payload in. Returns `true` when the result is final no
    /// matter what the remaining peers say.
    pub fn merge(&mut self, payload: ResponsePayload) -> Result<bool, PayloadMismatch> {
        match (self, payload) {
            (Accumulator::Sockets(acc), ResponsePayload::Sockets(sockets)) => {
                for (id, info) in sockets {
                    if acc.insert(id.clone(), info).is_some() {
                        tracing::warn!(socket_id = %id, "Socket reported by more than one node");
                    }
                }
                Ok(false)
            }
            (Accumulator::Channels(acc), ResponsePayload::Channels(channels)) => {
                for (channel, ids) in channels {
                    acc.entry(channel).or_default().extend(ids);
                }
                Ok(false)
            }
            (Accumulator::ChannelCounts(acc), ResponsePayload::ChannelCounts(counts)) => {
                for (channel, count) in counts {
                    *acc.entry(channel).or_default() += count;
                }
                Ok(false)
            }
            (Accumulator::Members(acc), ResponsePayload::Members(members)) => {
                acc.extend(members);
                Ok(false)
            }
            (Accumulator::Count(acc), ResponsePayload::TotalCount(count)) => {
                *acc += count;
                Ok(false)
            }
            (Accumulator::Exists(acc), ResponsePayload::Exists(exists)) => {
                *acc = *acc || exists;
                Ok(*acc)
            }
            _ => Err(PayloadMismatch),
        }
    }
}

impl From<ResponsePayload> for Accumulator {
    fn from(payload: ResponsePayload) -> Self {
        match payload {
            ResponsePayload::Sockets(sockets) => Accumulator::Sockets(sockets.into_iter().collect()),
            ResponsePayload::Channels(channels) => Accumulator::Channels(
                channels
                    .into_iter()
                    .map(|(channel, ids)| (channel, ids.into_iter().collect()))
                    .collect(),
            ),
            ResponsePayload::ChannelCounts(counts) => {
                Accumulator::ChannelCounts(counts.into_iter().collect())
            }
            ResponsePayload::Members(members) => Accumulator::Members(members.into_iter().collect()),
            ResponsePayload::TotalCount(count) => Accumulator::Count(count),
            ResponsePayload::Exists(exists) => Accumulator::Exists(exists),
        }
    }
}

impl Accumulator {
    pub fn into_sockets(self) -> Option<HashMap<SocketId, SocketInfo>> {
        match self {
            Accumulator::Sockets(sockets) => Some(sockets),
            _ => None,
        }
    }

    pub fn into_channels(self) -> Option<HashMap<String, HashSet<SocketId>>> {
        match self {
            Accumulator::Channels(channels) => Some(channels),
            _ => None,
        }
    }

    pub fn into_channel_counts(self) -> Option<HashMap<String, usize>> {
        match self {
            Accumulator::ChannelCounts(counts) => Some(counts),
            _ => None,
        }
    }

    pub fn into_members(self) -> Option<HashMap<String, Value>> {
        match self {
            Accumulator::Members(members) => Some(members),
            _ => None,
        }
    }

    pub fn into_count(self) -> Option<usize> {
        match self {
            Accumulator::Count(count) => Some(count),
            _ => None,
        }
    }

    pub fn into_exists(self) -> Option<bool> {
        match self {
            Accumulator::Exists(exists) => Some(exists),
            _ => None,
        }
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Resolved,
    ShortCircuited,
    TimedOut,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }

    pub fn outcome(&self) -> Option<RequestOutcome> {
        match self {
            RequestState::Pending => None,
            RequestState::Resolved => Some(RequestOutcome::Resolved),
            RequestState::ShortCircuited => Some(RequestOutcome::ShortCircuited),
            RequestState::TimedOut => Some(RequestOutcome::TimedOut),
        }
    }
}

/// One in-flight request issued by this node.
#[derive(Debug)]
pub struct PendingRequest {
    pub app_id: AppId,
    pub request_type: RequestType,
    /// Nodes expected to contribute, this one included.
    pub expected: usize,
    /// Contributions so far; starts at 1 for the local answer.
    pub received: usize,
    pub accumulator: Accumulator,
    pub state: RequestState,
    pub started: Instant,
    reply: Option<oneshot::Sender<Accumulator>>,
}

impl PendingRequest {
    pub fn new(
        app_id: AppId,
        request_type: RequestType,
        expected: usize,
        local: Accumulator,
    ) -> (Self, oneshot::Receiver<Accumulator>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            app_id,
            request_type,
            expected,
            received: 1,
            accumulator: local,
            state: RequestState::Pending,
            started: Instant::now(),
            reply: Some(tx),
        };
        (request, rx)
    }

    /// Moves to a terminal state. Returns `false` if already terminal.
    fn transition(&mut self, next: RequestState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    /// Hands the accumulator to the waiting caller.
    fn complete(mut self, next: RequestState) -> FinishedRequest {
        let accepted = self.transition(next);
        let elapsed = self.started.elapsed();
        if accepted {
            if let Some(reply) = self.reply.take() {
                // The caller may already have given up; nothing to do then.
                let _ = reply.send(self.accumulator);
            }
        }
        FinishedRequest {
            app_id: self.app_id,
            request_type: self.request_type,
            received: self.received,
            expected: self.expected,
            state: self.state,
            elapsed,
        }
    }
}

/// Summary of a request that left the table.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRequest {
    pub app_id: AppId,
    pub request_type: RequestType,
    pub received: usize,
    pub expected: usize,
    pub state: RequestState,
    pub elapsed: Duration,
}

/// What happened to a response handed to the table.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseDisposition {
    /// No such request in flight; stale or someone else's.
    Unknown,
    /// Payload did not fit the request; dropped.
    Mismatched,
    /// Merged; still waiting for `expected - received` peers.
    Merged { received: usize, expected: usize },
    /// Merged and finished.
    Finished(FinishedRequest),
}

/// Table of in-flight requests keyed by request id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: String, request: PendingRequest) {
        self.inner.lock().await.insert(request_id, request);
    }

    pub async fn contains(&self, request_id: &str) -> bool {
        self.inner.lock().await.contains_key(request_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Merges a peer response and finishes the request once every expected
    /// node answered, or immediately on a positive existence check.
    pub async fn apply_response(
        &self,
        request_id: &str,
        payload: ResponsePayload,
    ) -> ResponseDisposition {
        let mut table = self.inner.lock().await;

        let request = match table.get_mut(request_id) {
            Some(request) => request,
            None => return ResponseDisposition::Unknown,
        };

        let conclusive = match request.accumulator.merge(payload) {
            Ok(conclusive) => conclusive,
            Err(_) => return ResponseDisposition::Mismatched,
        };
        request.received += 1;

        let next = if conclusive {
            RequestState::ShortCircuited
        } else if request.received >= request.expected {
            RequestState::Resolved
        } else {
            return ResponseDisposition::Merged {
                received: request.received,
                expected: request.expected,
            };
        };

        match table.remove(request_id) {
            Some(request) => ResponseDisposition::Finished(request.complete(next)),
            None => ResponseDisposition::Unknown,
        }
    }

    /// Removes a request whose deadline elapsed. `None` if it already
    /// finished. Partial results are discarded.
    pub async fn expire(&self, request_id: &str) -> Option<FinishedRequest> {
        let mut request = self.inner.lock().await.remove(request_id)?;
        request.reply = None;
        Some(request.complete(RequestState::TimedOut))
    }

    /// Removes a request that never went out. Returns whether it existed.
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.inner.lock().await.remove(request_id).is_some()
    }

    /// Drops every in-flight request; waiting callers see their reply
    /// channel close.
    pub async fn abandon_all(&self) -> usize {
        let mut table = self.inner.lock().await;
        let count = table.len();
        table.clear();
        count
    }
}

/// Removes a request from its table when dropped while still armed.
///
/// The caller of a cross-node query holds one across the wait, so a caller
/// cancelled mid-wait (client hung up, task aborted) does not leave its
/// entry behind.
#[derive(Debug)]
pub struct PendingGuard {
    table: Arc<PendingRequests>,
    request_id: Option<String>,
}

impl PendingGuard {
    pub fn new(table: Arc<PendingRequests>, request_id: String) -> Self {
        Self {
            table,
            request_id: Some(request_id),
        }
    }

    /// The request reached a terminal state through the normal path.
    pub fn disarm(mut self) {
        self.request_id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(request_id) = self.request_id.take() else {
            return;
        };

        if let Ok(mut table) = self.table.inner.try_lock() {
            if table.remove(&request_id).is_some() {
                tracing::debug!(request_id = %request_id, "Dropped request abandoned by its caller");
            }
            return;
        }

        // Table is busy; finish the removal on the runtime.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let table = self.table.clone();
                handle.spawn(async move {
                    if table.cancel(&request_id).await {
                        tracing::debug!(request_id = %request_id, "Dropped request abandoned by its caller");
                    }
                });
            }
            Err(_) => tracing::warn!(
                request_id = %request_id,
                "No runtime to remove abandoned request"
            ),
        }
    }
}
