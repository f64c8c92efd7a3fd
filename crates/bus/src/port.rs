use crate::{Error, MessageSender};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// One end of a named duplex channel.
#[async_trait]
pub trait Port: Send + Sync + 'static {
    /// Name the port was opened with.
    fn name(&self) -> &str;

    /// The context that opened the port, on the receiving side. `None` on the
    /// opening side.
    fn sender(&self) -> Option<&MessageSender>;

    /// Posts a message to the other side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] once either side disconnected.
    fn post_message(&self, message: Value) -> Result<(), Error>;

    /// Waits for the next message. Returns `None` once the port is closed.
    async fn recv(&self) -> Option<Value>;

    /// Closes this end of the port.
    fn disconnect(&self);

    /// Whether the port can still carry messages.
    fn is_connected(&self) -> bool;
}

/// Accepts ports opened by other contexts.
#[async_trait]
pub trait PortListener: Send + Sync + 'static {
    /// Waits for the next incoming port. Returns `None` once closed.
    async fn accept(&self) -> Option<Arc<dyn Port>>;

    /// Stops accepting ports.
    fn close(&self);
}

/// Opens and listens for ports.
#[async_trait]
pub trait PortConnector: Send + Sync + 'static {
    /// Opens a port with the given name towards every other listening context.
    async fn connect(&self, name: &str) -> Result<Arc<dyn Port>, Error>;

    /// Starts listening for ports opened by other contexts.
    async fn listen(&self) -> Result<Box<dyn PortListener>, Error>;
}
