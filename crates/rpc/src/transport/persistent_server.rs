//! RPC server over named ports.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use courier_bus::{PortConnector, PortListener};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::codec::{decode_port_message, peek_correlation_id};
use crate::protocol::{CorrelationId, DecodeError, Outcome, PortMessage, ResultEnvelope, TargetId};
use crate::registry::HandlerRegistry;
use crate::server::Server;
use crate::transport::connection::{Connection, ConnectionSet};

/// Serves calls arriving on ports named after its target id.
///
/// Every accepted port is a connection of its own. Calls on one connection
/// run concurrently and each result goes back on the port it came from.
///
/// A peer context may hold several ports at once; each is a separate
/// connection and counts towards [`ServerConfig::max_connections`].
pub struct PersistentServer {
    target_id: TargetId,
    registry: Arc<HandlerRegistry>,
    connector: Arc<dyn PortConnector>,
    config: ServerConfig,
    connections: Arc<ConnectionSet>,
    state: Mutex<Option<Running>>,
}

struct Running {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// What serving tasks share.
struct ServeContext {
    target_id: TargetId,
    dispatcher: Dispatcher,
    connections: Arc<ConnectionSet>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl PersistentServer {
    /// Creates a stopped server with the default configuration.
    pub fn new(
        target_id: TargetId,
        registry: Arc<HandlerRegistry>,
        connector: Arc<dyn PortConnector>,
    ) -> Self {
        Self::with_config(target_id, registry, connector, ServerConfig::default())
    }

    /// Creates a stopped server.
    pub fn with_config(
        target_id: TargetId,
        registry: Arc<HandlerRegistry>,
        connector: Arc<dyn PortConnector>,
        config: ServerConfig,
    ) -> Self {
        Self {
            target_id,
            registry,
            connector,
            config,
            connections: Arc::new(ConnectionSet::default()),
            state: Mutex::new(None),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl Server for PersistentServer {
    fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[instrument(skip(self), fields(target = %self.target_id))]
    async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning(self.target_id.to_string()));
        }

        let listener = self.connector.listen().await?;

        let mut state = self.state.lock();
        if state.is_some() {
            listener.close();
            return Err(Error::AlreadyRunning(self.target_id.to_string()));
        }

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let context = Arc::new(ServeContext {
            target_id: self.target_id.clone(),
            dispatcher: Dispatcher::new(self.target_id.as_str(), Arc::clone(&self.registry)),
            connections: Arc::clone(&self.connections),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
        });

        tracker.spawn(accept_loop(
            listener,
            context,
            Arc::new(Semaphore::new(self.config.max_connections)),
        ));

        *state = Some(Running { shutdown, tracker });

        info!("Persistent server {} listening", self.target_id);
        Ok(())
    }

    #[instrument(skip(self), fields(target = %self.target_id))]
    async fn shutdown(&self) {
        let running = self.state.lock().take();
        let Some(running) = running else {
            return;
        };

        running.shutdown.cancel();
        self.connections.disconnect_all();
        running.tracker.close();
        running.tracker.wait().await;

        info!("Persistent server {} stopped", self.target_id);
    }

    fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl Drop for PersistentServer {
    fn drop(&mut self) {
        if let Some(running) = self.state.get_mut().take() {
            running.shutdown.cancel();
            self.connections.disconnect_all();
        }
    }
}

impl Debug for PersistentServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentServer")
            .field("target_id", &self.target_id)
            .field("config", &self.config)
            .field("connections", &self.connections.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: Box<dyn PortListener>,
    context: Arc<ServeContext>,
    limit: Arc<Semaphore>,
) {
    loop {
        let port = tokio::select! {
            () = context.shutdown.cancelled() => break,
            port = listener.accept() => match port {
                Some(port) => port,
                None => break,
            },
        };

        if port.name() != context.target_id.as_str() {
            trace!("Ignoring port {} opened towards {}", port.name(), context.target_id);
            port.disconnect();
            continue;
        }

        let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
            warn!(
                "Max connections reached, rejecting port from {:?}",
                port.sender().map(|sender| &sender.context)
            );
            port.disconnect();
            continue;
        };

        let connection = context.connections.insert(port);
        context
            .tracker
            .spawn(serve_connection(connection, Arc::clone(&context), permit));
    }

    listener.close();
    debug!("Stopped accepting ports for {}", context.target_id);
}

async fn serve_connection(
    connection: Arc<Connection>,
    context: Arc<ServeContext>,
    _permit: OwnedSemaphorePermit,
) {
    loop {
        let message = tokio::select! {
            () = context.shutdown.cancelled() => break,
            message = connection.port().recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        handle_message(&connection, &context, &message);
    }

    connection.port().disconnect();
    context.connections.remove(connection.id());
}

fn reject(connection: &Connection, correlation_id: CorrelationId, error: &Error) {
    connection.send_result(&ResultEnvelope::correlated(
        correlation_id,
        Outcome::Rejected(error.to_string()),
    ));
}

fn handle_message(connection: &Arc<Connection>, context: &Arc<ServeContext>, message: &Value) {
    let call = match decode_port_message(message) {
        Ok(PortMessage::Call(call)) => call,
        Ok(PortMessage::Cancel { correlation_id, .. }) => {
            if connection.cancel_call(&correlation_id) {
                debug!("Call {} cancelled by {}", correlation_id, connection.peer());
            }
            return;
        }
        Err(DecodeError::Foreign) => {
            trace!("Ignoring foreign message on connection {}", connection.id());
            return;
        }
        Err(DecodeError::Malformed(reason)) => {
            match peek_correlation_id(message) {
                Some(correlation_id) => {
                    reject(connection, correlation_id, &Error::MalformedCall(reason));
                }
                None => warn!(
                    "Dropping malformed message from {}: {}",
                    connection.peer(),
                    reason
                ),
            }
            return;
        }
    };

    let Some(correlation_id) = call.correlation_id.clone() else {
        return;
    };

    if call.target_id != context.target_id {
        let error = Error::MalformedCall(format!(
            "call addressed to {} reached {}",
            call.target_id, context.target_id
        ));
        reject(connection, correlation_id, &error);
        return;
    }

    let Some(token) = connection.begin_call(&correlation_id, &context.shutdown) else {
        let error = Error::MalformedCall(format!("duplicate correlation id {correlation_id}"));
        reject(connection, correlation_id, &error);
        return;
    };

    let connection = Arc::clone(connection);
    let dispatcher = context.dispatcher.clone();
    context.tracker.spawn(async move {
        let outcome = tokio::select! {
            () = token.cancelled() => None,
            outcome = dispatcher.settle(&call.handler_name, call.params) => Some(outcome),
        };

        connection.finish_call(&correlation_id);

        match outcome {
            Some(outcome) => {
                connection.send_result(&ResultEnvelope::correlated(correlation_id, outcome));
            }
            None => debug!("Call {} to {} abandoned", correlation_id, call.handler_name),
        }
    });
}
