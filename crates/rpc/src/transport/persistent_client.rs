//! RPC client over a named port.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_bus::{Port, PortConnector};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::probe::{self, PING};
use crate::protocol::codec::{decode_result, encode_call, encode_cancel, peek_correlation_id};
use crate::protocol::{CallEnvelope, CorrelationId, DecodeError, ResultEnvelope, TargetId};
use crate::transport::pending::PendingCalls;

/// Per-call overrides.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Replaces the configured call timeout.
    pub timeout: Option<Duration>,
    /// Abandons the call once cancelled.
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

struct ClientConnection {
    port: Arc<dyn Port>,
    reader: JoinHandle<()>,
}

/// Calls a [`crate::PersistentServer`] over one long-lived port.
///
/// Many calls share the port; results are matched to calls by correlation
/// id.
pub struct PersistentClient {
    target_id: TargetId,
    handler_names: Vec<String>,
    connector: Arc<dyn PortConnector>,
    config: ClientConfig,
    pending: Arc<PendingCalls>,
    connection: Mutex<Option<ClientConnection>>,
}

impl PersistentClient {
    /// Creates a disconnected client declaring `handler_names`.
    pub fn new<I, S>(target_id: TargetId, handler_names: I, connector: Arc<dyn PortConnector>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(target_id, handler_names, connector, ClientConfig::default())
    }

    /// Creates a disconnected client with a custom configuration.
    pub fn with_config<I, S>(
        target_id: TargetId,
        handler_names: I,
        connector: Arc<dyn PortConnector>,
        config: ClientConfig,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_id,
            handler_names: handler_names.into_iter().map(Into::into).collect(),
            connector,
            config,
            pending: Arc::new(PendingCalls::new()),
            connection: Mutex::new(None),
        }
    }

    /// Opens the port to the target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if a live connection exists, or a
    /// bus error if nothing listens for the port.
    #[instrument(skip(self), fields(target = %self.target_id))]
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected(self.target_id.to_string()));
        }

        let port = self.connector.connect(self.target_id.as_str()).await?;

        let mut connection = self.connection.lock();
        if connection.as_ref().is_some_and(|c| c.port.is_connected()) {
            port.disconnect();
            return Err(Error::AlreadyConnected(self.target_id.to_string()));
        }
        if let Some(stale) = connection.take() {
            stale.reader.abort();
            // The aborted reader may not have drained calls sent on the dead port.
            let rejected = self.reject_pending();
            debug!("Replaced closed port, rejected {} pending call(s)", rejected);
        }

        let reader = tokio::spawn(read_results(
            Arc::clone(&port),
            Arc::clone(&self.pending),
            self.target_id.clone(),
        ));
        *connection = Some(ClientConnection { port, reader });

        debug!("Connected to {}", self.target_id);
        Ok(())
    }

    /// Closes the port and rejects every pending call with
    /// [`Error::ClientDisconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if there is no connection.
    #[instrument(skip(self), fields(target = %self.target_id))]
    pub fn disconnect(&self) -> Result<()> {
        let connection = self
            .connection
            .lock()
            .take()
            .ok_or_else(|| Error::NotConnected(self.target_id.to_string()))?;

        connection.reader.abort();
        connection.port.disconnect();

        let rejected = self.reject_pending();
        debug!(
            "Disconnected from {}, rejected {} pending call(s)",
            self.target_id, rejected
        );
        Ok(())
    }

    /// Whether the port is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|connection| connection.port.is_connected())
    }

    /// Calls awaiting their result.
    #[must_use]
    pub fn pending_calls(&self) -> &PendingCalls {
        &self.pending
    }

    /// Calls `handler_name` with per-call options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection,
    /// [`Error::CallTimeout`] or [`Error::CallCancelled`] if the call is
    /// abandoned, [`Error::ClientDisconnected`] if the port closes first, and
    /// [`Error::Rejected`] if the handler failed.
    #[instrument(skip(self, params, options), fields(target = %self.target_id))]
    pub async fn invoke_with(
        &self,
        handler_name: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let port = self
            .live_port()
            .ok_or_else(|| Error::NotConnected(self.target_id.to_string()))?;

        let correlation_id = CorrelationId::new();
        let call = CallEnvelope::new(self.target_id.clone(), handler_name, params)
            .with_correlation_id(correlation_id.clone());

        let mut reply = self.pending.register(correlation_id.clone(), handler_name);
        debug!(
            "Sending call {} to {} (pending: {})",
            correlation_id,
            handler_name,
            self.pending.len()
        );

        if let Err(e) = port.post_message(encode_call(&call)) {
            self.pending.remove(&correlation_id);
            return Err(e.into());
        }

        let timeout = options.timeout.unwrap_or_else(|| self.config.call_timeout());
        let cancellation = options.cancellation.unwrap_or_default();
        let started = Instant::now();

        let abandoned = tokio::select! {
            biased;
            result = &mut reply => return self.received(result),
            () = tokio::time::sleep(timeout) => Error::CallTimeout {
                handler: handler_name.to_string(),
                elapsed: started.elapsed(),
            },
            () = cancellation.cancelled() => Error::CallCancelled {
                handler: handler_name.to_string(),
            },
        };

        if self.pending.remove(&correlation_id).is_none() {
            // Settled while we were giving up.
            return self.received(reply.await);
        }

        debug!("Abandoning call {}: {}", correlation_id, abandoned);
        if let Err(e) = port.post_message(encode_cancel(&self.target_id, &correlation_id)) {
            trace!("Could not send cancel for {}: {}", correlation_id, e);
        }

        Err(abandoned)
    }

    fn received(
        &self,
        result: std::result::Result<Result<Value>, tokio::sync::oneshot::error::RecvError>,
    ) -> Result<Value> {
        result.unwrap_or_else(|_| Err(Error::ClientDisconnected(self.target_id.to_string())))
    }

    fn live_port(&self) -> Option<Arc<dyn Port>> {
        self.connection
            .lock()
            .as_ref()
            .filter(|connection| connection.port.is_connected())
            .map(|connection| Arc::clone(&connection.port))
    }

    fn reject_pending(&self) -> usize {
        let target = self.target_id.to_string();
        self.pending
            .reject_all(|_| Error::ClientDisconnected(target.clone()))
    }
}

#[async_trait]
impl Client for PersistentClient {
    fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    fn handler_names(&self) -> &[String] {
        &self.handler_names
    }

    async fn invoke(&self, handler_name: &str, params: Vec<Value>) -> Result<Value> {
        self.invoke_with(handler_name, params, CallOptions::default())
            .await
    }

    async fn is_available(&self) -> bool {
        if !self.is_connected() {
            debug!("{} is not available: not connected", self.target_id);
            return false;
        }

        let options = CallOptions::default().with_timeout(self.config.probe_timeout());
        probe::evaluate(
            &self.target_id,
            self.invoke_with(PING, Vec::new(), options).await,
        )
    }
}

impl Drop for PersistentClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader.abort();
            connection.port.disconnect();
            self.reject_pending();
        }
    }
}

impl Debug for PersistentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentClient")
            .field("target_id", &self.target_id)
            .field("handler_names", &self.handler_names)
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Settles pending calls from results arriving on `port` until it closes.
async fn read_results(port: Arc<dyn Port>, pending: Arc<PendingCalls>, target_id: TargetId) {
    while let Some(message) = port.recv().await {
        match decode_result(&message) {
            Ok(ResultEnvelope {
                correlation_id: Some(correlation_id),
                outcome,
            }) => {
                if !pending.settle(&correlation_id, outcome.into_result()) {
                    warn!("Dropping result for unknown call {}", correlation_id);
                }
            }
            Ok(ResultEnvelope {
                correlation_id: None,
                ..
            }) => warn!("Dropping result without correlation id from {}", target_id),
            Err(DecodeError::Foreign) => trace!("Ignoring foreign message from {}", target_id),
            Err(DecodeError::Malformed(reason)) => match peek_correlation_id(&message) {
                Some(correlation_id) => {
                    if !pending.settle(&correlation_id, Err(Error::MalformedResult(reason))) {
                        warn!("Dropping malformed result for unknown call {}", correlation_id);
                    }
                }
                None => warn!("Dropping malformed result from {}: {}", target_id, reason),
            },
        }
    }

    let target = target_id.to_string();
    let rejected = pending.reject_all(|_| Error::ClientDisconnected(target.clone()));
    debug!(
        "Port to {} closed, rejected {} pending call(s)",
        target_id, rejected
    );
}
