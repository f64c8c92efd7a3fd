//! Pending calls of a persistent client.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::CorrelationId;

/// Type alias for the channel settling a call.
pub type ReplySender = oneshot::Sender<Result<Value>>;

/// A call sent but not settled yet.
#[derive(Debug)]
pub struct PendingCall {
    handler_name: String,
    started: Instant,
    reply: ReplySender,
}

impl PendingCall {
    /// The called handler.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// When the call was sent.
    #[must_use]
    pub const fn started(&self) -> Instant {
        self.started
    }
}

/// Calls awaiting their result, keyed by correlation id.
///
/// Removing a record is what settles a call, so whichever of reply,
/// timeout, cancellation or disconnect gets there first wins and the others
/// find nothing to do.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: DashMap<CorrelationId, PendingCall>,
}

impl PendingCalls {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call and returns the receiver its result will arrive on.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        handler_name: &str,
    ) -> oneshot::Receiver<Result<Value>> {
        let (reply, rx) = oneshot::channel();
        self.calls.insert(
            correlation_id,
            PendingCall {
                handler_name: handler_name.to_string(),
                started: Instant::now(),
                reply,
            },
        );
        rx
    }

    /// Settles a call. Returns `false` if no such call is pending.
    pub fn settle(&self, correlation_id: &CorrelationId, result: Result<Value>) -> bool {
        let Some((_, call)) = self.calls.remove(correlation_id) else {
            return false;
        };

        debug!(
            "call {} to {} settled after {:?}",
            correlation_id,
            call.handler_name,
            call.started.elapsed()
        );

        // The caller may have stopped waiting.
        let _ = call.reply.send(result);
        true
    }

    /// Removes a call without settling it.
    pub fn remove(&self, correlation_id: &CorrelationId) -> Option<PendingCall> {
        self.calls.remove(correlation_id).map(|(_, call)| call)
    }

    /// Rejects every pending call with the error built by `error`. Returns
    /// how many calls were rejected.
    pub fn reject_all(&self, error: impl Fn(&PendingCall) -> Error) -> usize {
        let ids: Vec<CorrelationId> = self.calls.iter().map(|entry| entry.key().clone()).collect();

        let mut rejected = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                let error = error(&call);
                let _ = call.reply.send(Err(error));
                rejected += 1;
            }
        }
        rejected
    }

    /// Whether a call is pending.
    #[must_use]
    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.calls.contains_key(correlation_id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
