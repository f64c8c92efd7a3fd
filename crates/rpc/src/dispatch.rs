//! Call dispatcher.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::Outcome;
use crate::registry::HandlerRegistry;

/// Runs registered handlers on behalf of one server and turns whatever they
/// do into an [`Outcome`].
#[derive(Clone, Debug)]
pub struct Dispatcher {
    owner: String,
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher. `owner` only appears in logs.
    pub fn new(owner: impl Into<String>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            owner: owner.into(),
            registry,
        }
    }

    /// The registry handlers are looked up in.
    #[must_use]
    pub const fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Runs `handler_name` with `params`.
    ///
    /// Handler errors and panics become [`Outcome::Rejected`] carrying their
    /// message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] if nothing is registered under
    /// `handler_name`.
    pub async fn dispatch(&self, handler_name: &str, params: Vec<Value>) -> Result<Outcome> {
        let handler = self
            .registry
            .get(handler_name)
            .ok_or_else(|| Error::HandlerNotFound(handler_name.to_string()))?;

        let signature = signature(&self.owner, handler_name, &params);
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Outcome::Fulfilled(value),
            Ok(Err(error)) => Outcome::Rejected(error.to_string()),
            Err(panic) => Outcome::Rejected(panic_message(panic.as_ref())),
        };

        debug!(
            "{} {:?} in {:?}",
            signature,
            outcome.status(),
            started.elapsed()
        );

        Ok(outcome)
    }

    /// Like [`Dispatcher::dispatch`], with a missing handler reported as a
    /// rejection.
    pub async fn settle(&self, handler_name: &str, params: Vec<Value>) -> Outcome {
        self.dispatch(handler_name, params)
            .await
            .unwrap_or_else(|error| Outcome::Rejected(error.to_string()))
    }
}

/// `owner::name(type, ..)`, never including values.
fn signature(owner: &str, handler_name: &str, params: &[Value]) -> String {
    let types: Vec<&str> = params.iter().map(json_type).collect();
    format!("{owner}::{handler_name}({})", types.join(", "))
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
