use thiserror::Error;

/// Errors reported by the host bus.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Nothing is listening in any other context.
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,

    /// The reply path was closed before a reply arrived, or was already used.
    #[error("The message port closed before a response was received.")]
    PortClosed,

    /// The port has been disconnected by either side.
    #[error("Attempting to use a disconnected port object")]
    Disconnected,

    /// This context already listens for incoming ports.
    #[error("Context {0} is already listening for ports")]
    AlreadyListening(String),
}
