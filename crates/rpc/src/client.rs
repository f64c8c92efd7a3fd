//! Client side of a call.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::probe::{self, PING};
use crate::protocol::TargetId;
use crate::registry::{Procedure, params_to_vec};

/// Calls handlers served under one target id.
#[async_trait]
pub trait Client: Send + Sync {
    /// The target every call is addressed to.
    fn target_id(&self) -> &TargetId;

    /// Handler names this client declared. Only these get stubs.
    fn handler_names(&self) -> &[String];

    /// Calls `handler_name` with positional `params` and waits for its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with the remote message if the handler
    /// failed, or a transport error if no result arrived.
    async fn invoke(&self, handler_name: &str, params: Vec<Value>) -> Result<Value>;

    /// Probes the target. Never fails: any problem reads as unavailable.
    async fn is_available(&self) -> bool {
        probe::evaluate(self.target_id(), self.invoke(PING, Vec::new()).await)
    }

    /// Returns a callable bound to a declared handler name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndeclaredHandler`] if the name was not declared.
    fn stub(&self, handler_name: &str) -> Result<Stub<'_, Self>>
    where
        Self: Sized,
    {
        if !self.handler_names().iter().any(|name| name == handler_name) {
            return Err(Error::UndeclaredHandler(handler_name.to_string()));
        }

        Ok(Stub {
            client: self,
            handler_name: handler_name.to_string(),
        })
    }

    /// Calls the handler of procedure `P` with typed parameters.
    ///
    /// # Errors
    ///
    /// As [`Client::invoke`], plus [`Error::Serialization`] if the value does
    /// not fit `P::Output`.
    async fn call<P: Procedure>(&self, params: P::Params) -> Result<P::Output>
    where
        Self: Sized,
    {
        let params = params_to_vec(&params)?;
        let value = self.invoke(P::NAME, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// A handler name bound to a client.
#[derive(Debug)]
pub struct Stub<'a, C> {
    client: &'a C,
    handler_name: String,
}

impl<C: Client> Stub<'_, C> {
    /// The bound handler name.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Calls the bound handler.
    ///
    /// # Errors
    ///
    /// As [`Client::invoke`].
    pub async fn call(&self, params: Vec<Value>) -> Result<Value> {
        self.client.invoke(&self.handler_name, params).await
    }
}
