//! Error types for the RPC layer.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A target or handler name was empty.
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// A handler with this name is already registered.
    #[error("Duplicate handler: {0}")]
    DuplicateHandler(String),

    /// No handler is registered under this name.
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    /// A call envelope could not be understood by the server.
    #[error("Malformed call: {0}")]
    MalformedCall(String),

    /// A reply could not be understood by the client.
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// No reply arrived in time.
    #[error("Call to {handler} timed out after {elapsed:?}")]
    CallTimeout {
        /// The handler that was called.
        handler: String,
        /// How long the call waited.
        elapsed: Duration,
    },

    /// The caller cancelled the call.
    #[error("Call to {handler} was cancelled")]
    CallCancelled {
        /// The handler that was called.
        handler: String,
    },

    /// The connection closed while the call was pending.
    #[error("Client disconnected from {0}")]
    ClientDisconnected(String),

    /// The client already holds a connection.
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// The client holds no connection.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// The server was started twice.
    #[error("Server {0} is already running")]
    AlreadyRunning(String),

    /// The client did not declare this handler name.
    #[error("Handler {0} is not declared by this client")]
    UndeclaredHandler(String),

    /// The remote handler failed. Displays exactly the remote reason.
    #[error("{0}")]
    Rejected(String),

    /// The host bus failed.
    #[error(transparent)]
    Bus(#[from] courier_bus::Error),

    /// Parameters or values could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Returns `true` for failures raised by the remote handler itself.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}
