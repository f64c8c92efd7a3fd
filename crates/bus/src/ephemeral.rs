use crate::Error;

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Identifies the context a message came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageSender {
    /// Extension the sending context belongs to.
    pub extension_id: String,

    /// Name of the sending context (e.g. `background`, `side-panel`).
    pub context: String,
}

impl MessageSender {
    /// Creates a sender description.
    pub fn new(extension_id: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            context: context.into(),
        }
    }
}

type ReplyFn = Box<dyn FnOnce(Value) -> Result<(), Error> + Send>;

/// The reply path bound to one incoming message.
///
/// Can be used at most once. If the listener that received it returned
/// `false` from [`MessageListener::on_message`], the bus closes the path and
/// [`Responder::send`] fails with [`Error::PortClosed`].
pub struct Responder {
    reply: ReplyFn,
}

impl Responder {
    /// Wraps a bus-specific reply function.
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(Value) -> Result<(), Error> + Send + 'static,
    {
        Self {
            reply: Box::new(reply),
        }
    }

    /// Sends the reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortClosed`] if the reply path was closed or another
    /// listener already replied.
    pub fn send(self, value: Value) -> Result<(), Error> {
        (self.reply)(value)
    }
}

impl Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

/// Handle returned when registering a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives one-shot messages.
///
/// `on_message` is synchronous on purpose: the bus decides whether to keep
/// the reply path open as soon as it returns. Listeners that want to reply
/// later must return `true` before doing any asynchronous work.
pub trait MessageListener: Send + Sync + 'static {
    /// Handles a message. Returns `true` to keep the reply path open.
    fn on_message(&self, message: &Value, sender: &MessageSender, responder: Responder) -> bool;
}

/// The one-shot request/reply primitive of the host.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Id of the extension this bus belongs to.
    fn extension_id(&self) -> &str;

    /// Sends a message to the listeners of every other context and waits for
    /// the first reply.
    async fn send_message(&self, message: Value) -> Result<Value, Error>;

    /// Registers a listener for messages sent by other contexts.
    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// Unregisters a listener. Returns `false` if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}
