//! RPC over one-shot bus messages.
//!
//! Each call is a single message whose reply is the result. Nothing is
//! correlated: the bus binds the reply path to the request.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_bus::{ListenerId, MessageBus, MessageListener, MessageSender, Responder};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::{Instant, timeout};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::probe::{self, PING};
use crate::protocol::codec::{decode_call, decode_result, encode_call, encode_result};
use crate::protocol::{CallEnvelope, DecodeError, ResultEnvelope, TargetId};
use crate::registry::HandlerRegistry;
use crate::server::Server;

/// Answers calls sent as one-shot messages.
pub struct EphemeralServer {
    target_id: TargetId,
    registry: Arc<HandlerRegistry>,
    bus: Arc<dyn MessageBus>,
    state: Mutex<Option<Running>>,
}

struct Running {
    listener_id: ListenerId,
    tracker: TaskTracker,
}

/// The bus listener installed by a running [`EphemeralServer`].
struct CallListener {
    target_id: TargetId,
    extension_id: String,
    dispatcher: Dispatcher,
    runtime: Handle,
    tracker: TaskTracker,
}

impl MessageListener for CallListener {
    fn on_message(&self, message: &Value, sender: &MessageSender, responder: Responder) -> bool {
        if sender.extension_id != self.extension_id {
            trace!("ignoring message from extension {}", sender.extension_id);
            return false;
        }

        let call = match decode_call(message) {
            Ok(call) => call,
            Err(DecodeError::Foreign) => return false,
            Err(DecodeError::Malformed(reason)) => {
                debug!("ignoring malformed call from {}: {}", sender.context, reason);
                return false;
            }
        };

        if call.target_id != self.target_id {
            trace!("call for {} is not for {}", call.target_id, self.target_id);
            return false;
        }

        let dispatcher = self.dispatcher.clone();
        self.tracker.spawn_on(
            async move {
                let outcome = dispatcher.settle(&call.handler_name, call.params).await;
                if let Err(e) = responder.send(encode_result(&ResultEnvelope::new(outcome))) {
                    error!("Failed to reply to {}: {}", call.handler_name, e);
                }
            },
            &self.runtime,
        );

        true
    }
}

impl EphemeralServer {
    /// Creates a stopped server.
    pub fn new(target_id: TargetId, registry: Arc<HandlerRegistry>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            target_id,
            registry,
            bus,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Server for EphemeralServer {
    fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[instrument(skip(self), fields(target = %self.target_id))]
    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(Error::AlreadyRunning(self.target_id.to_string()));
        }

        let tracker = TaskTracker::new();
        let listener = CallListener {
            target_id: self.target_id.clone(),
            extension_id: self.bus.extension_id().to_string(),
            dispatcher: Dispatcher::new(self.target_id.as_str(), Arc::clone(&self.registry)),
            runtime: Handle::current(),
            tracker: tracker.clone(),
        };

        let listener_id = self.bus.add_listener(Arc::new(listener));
        *state = Some(Running {
            listener_id,
            tracker,
        });

        info!("Ephemeral server {} started", self.target_id);
        Ok(())
    }

    #[instrument(skip(self), fields(target = %self.target_id))]
    async fn shutdown(&self) {
        let running = self.state.lock().take();
        let Some(running) = running else {
            return;
        };

        self.bus.remove_listener(running.listener_id);
        running.tracker.close();
        running.tracker.wait().await;

        info!("Ephemeral server {} stopped", self.target_id);
    }

    fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl Drop for EphemeralServer {
    fn drop(&mut self) {
        if let Some(running) = self.state.get_mut().take() {
            self.bus.remove_listener(running.listener_id);
        }
    }
}

impl Debug for EphemeralServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralServer")
            .field("target_id", &self.target_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Sends calls as one-shot messages.
pub struct EphemeralClient {
    target_id: TargetId,
    handler_names: Vec<String>,
    bus: Arc<dyn MessageBus>,
    config: ClientConfig,
}

impl EphemeralClient {
    /// Creates a client declaring `handler_names`.
    pub fn new<I, S>(target_id: TargetId, handler_names: I, bus: Arc<dyn MessageBus>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(target_id, handler_names, bus, ClientConfig::default())
    }

    /// Creates a client with a custom configuration.
    pub fn with_config<I, S>(
        target_id: TargetId,
        handler_names: I,
        bus: Arc<dyn MessageBus>,
        config: ClientConfig,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_id,
            handler_names: handler_names.into_iter().map(Into::into).collect(),
            bus,
            config,
        }
    }

    async fn send_call(
        &self,
        handler_name: &str,
        params: Vec<Value>,
        limit: Duration,
    ) -> Result<Value> {
        let call = CallEnvelope::new(self.target_id.clone(), handler_name, params);
        let started = Instant::now();

        let reply = timeout(limit, self.bus.send_message(encode_call(&call)))
            .await
            .map_err(|_| Error::CallTimeout {
                handler: handler_name.to_string(),
                elapsed: started.elapsed(),
            })??;

        debug!("{} replied after {:?}", handler_name, started.elapsed());

        let result = decode_result(&reply).map_err(|e| Error::MalformedResult(e.to_string()))?;
        result.outcome.into_result()
    }
}

#[async_trait]
impl Client for EphemeralClient {
    fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    fn handler_names(&self) -> &[String] {
        &self.handler_names
    }

    #[instrument(skip(self, params), fields(target = %self.target_id))]
    async fn invoke(&self, handler_name: &str, params: Vec<Value>) -> Result<Value> {
        self.send_call(handler_name, params, self.config.call_timeout())
            .await
    }

    async fn is_available(&self) -> bool {
        probe::evaluate(
            &self.target_id,
            self.send_call(PING, Vec::new(), self.config.probe_timeout())
                .await,
        )
    }
}

impl Debug for EphemeralClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralClient")
            .field("target_id", &self.target_id)
            .field("handler_names", &self.handler_names)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
