//! Connections accepted by a persistent server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use courier_bus::{MessageSender, Port};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::protocol::codec::encode_result;
use crate::protocol::{CorrelationId, ResultEnvelope};

/// One accepted port and the calls running on it.
pub(crate) struct Connection {
    id: u64,
    port: Arc<dyn Port>,
    peer: Option<MessageSender>,
    opened_at: Instant,
    in_flight: DashMap<CorrelationId, CancellationToken>,
}

impl Connection {
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn port(&self) -> &Arc<dyn Port> {
        &self.port
    }

    /// Context that opened the port, for logs.
    pub(crate) fn peer(&self) -> &str {
        self.peer
            .as_ref()
            .map_or("unknown", |peer| peer.context.as_str())
    }

    /// Tracks a new call. Returns `None` if a call with the same id is
    /// already running on this connection.
    pub(crate) fn begin_call(
        &self,
        correlation_id: &CorrelationId,
        parent: &CancellationToken,
    ) -> Option<CancellationToken> {
        match self.in_flight.entry(correlation_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => Some(entry.insert(parent.child_token()).clone()),
        }
    }

    pub(crate) fn finish_call(&self, correlation_id: &CorrelationId) {
        self.in_flight.remove(correlation_id);
    }

    /// Cancels a running call. Returns `false` if it already finished.
    pub(crate) fn cancel_call(&self, correlation_id: &CorrelationId) -> bool {
        self.in_flight
            .remove(correlation_id)
            .map(|(_, token)| token.cancel())
            .is_some()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Writes a result back. Failures are logged: the peer may be gone.
    pub(crate) fn send_result(&self, result: &ResultEnvelope) -> bool {
        match self.port.post_message(encode_result(result)) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to send result {:?} to {} on connection {}: {}",
                    result.correlation_id,
                    self.peer(),
                    self.id,
                    e
                );
                false
            }
        }
    }
}

/// Live connections of one server.
#[derive(Default)]
pub(crate) struct ConnectionSet {
    next_id: AtomicU64,
    connections: DashMap<u64, Arc<Connection>>,
}

impl ConnectionSet {
    pub(crate) fn insert(&self, port: Arc<dyn Port>) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection {
            id,
            peer: port.sender().cloned(),
            port,
            opened_at: Instant::now(),
            in_flight: DashMap::new(),
        });

        self.connections.insert(id, Arc::clone(&connection));
        debug!(
            "Accepted connection {} from {} (total: {})",
            id,
            connection.peer(),
            self.connections.len()
        );
        connection
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            debug!(
                "Connection {} from {} closed after {:?} with {} call(s) in flight",
                id,
                connection.peer(),
                connection.opened_at.elapsed(),
                connection.in_flight()
            );
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// Disconnects and forgets every connection.
    pub(crate) fn disconnect_all(&self) {
        let ids: Vec<u64> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, connection)) = self.connections.remove(&id) {
                connection.port.disconnect();
            }
        }
    }
}
