//! Server side of a call.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::TargetId;
use crate::registry::{HandlerRegistry, Procedure};

/// Serves the handlers of a registry under one target id.
#[async_trait]
pub trait Server: Send + Sync {
    /// The target id calls must be addressed to.
    fn target_id(&self) -> &TargetId;

    /// The served handlers. Handlers may be added while running.
    fn registry(&self) -> &Arc<HandlerRegistry>;

    /// Starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyRunning`] if already started, or a bus
    /// error if the transport cannot be set up.
    async fn start(&self) -> Result<()>;

    /// Stops serving and waits for in-flight calls to finish.
    async fn shutdown(&self);

    /// Whether the server was started and not shut down.
    fn is_running(&self) -> bool;

    /// Registers a handler on the served registry.
    ///
    /// # Errors
    ///
    /// As [`HandlerRegistry::register`].
    fn register<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.registry().register(name, handler)
    }

    /// Registers a typed handler on the served registry.
    ///
    /// # Errors
    ///
    /// As [`HandlerRegistry::register`].
    fn register_procedure<P, F, Fut>(&self, handler: F) -> Result<()>
    where
        Self: Sized,
        P: Procedure,
        F: Fn(P::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P::Output>> + Send + 'static,
    {
        self.registry().register_procedure::<P, F, Fut>(handler)
    }
}
