//! Envelope types.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Marker carried in the `proto` field of every envelope. Messages without
/// it belong to somebody else on the bus.
pub const PROTOCOL_MARKER: &str = "courier.rpc";

/// Names a logical endpoint. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Creates a target id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidName(id));
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TargetId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TargetId> for String {
    fn from(value: TargetId) -> Self {
        value.0
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pairs a persistent-transport call with its result.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to run a named handler with positional parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CallEnvelope {
    /// The endpoint the call is addressed to.
    pub target_id: TargetId,
    /// The handler to run. Never empty once decoded.
    pub handler_name: String,
    /// Positional parameters.
    pub params: Vec<Value>,
    /// Present on the persistent transport only.
    pub correlation_id: Option<CorrelationId>,
}

impl CallEnvelope {
    /// Creates an envelope without correlation id.
    pub fn new(target_id: TargetId, handler_name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            target_id,
            handler_name: handler_name.into(),
            params,
            correlation_id: None,
        }
    }

    /// Tags the envelope with a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Status of a result on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The handler returned a value.
    Fulfilled,
    /// The handler failed.
    Rejected,
}

/// How a call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The handler's return value.
    Fulfilled(Value),
    /// The handler's failure, reduced to its message.
    Rejected(String),
}

impl Outcome {
    /// Wire status of this outcome.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Fulfilled(_) => Status::Fulfilled,
            Self::Rejected(_) => Status::Rejected,
        }
    }

    /// Converts the outcome into what a caller sees.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] carrying the reason for a rejected outcome.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(reason) => Err(Error::Rejected(reason)),
        }
    }
}

/// The settlement of a call.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultEnvelope {
    /// Copied from the call on the persistent transport.
    pub correlation_id: Option<CorrelationId>,
    /// The outcome.
    pub outcome: Outcome,
}

impl ResultEnvelope {
    /// Result of an ephemeral call.
    #[must_use]
    pub const fn new(outcome: Outcome) -> Self {
        Self {
            correlation_id: None,
            outcome,
        }
    }

    /// Result of a persistent call.
    #[must_use]
    pub const fn correlated(correlation_id: CorrelationId, outcome: Outcome) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            outcome,
        }
    }
}
