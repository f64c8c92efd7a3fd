//! In-memory host bus implementation
//!
//! This bus routes messages and ports between named contexts of an extension
//! within the same process, following the delivery rules of the browser host.
//! Useful for tests, demos and for embedding both contexts in one binary.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod port;

pub use port::{MemoryPort, MemoryPortListener};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use courier_bus::{
    Error, ListenerId, MessageBus, MessageListener, MessageSender, Port, PortConnector,
    PortListener, Responder,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

struct RegisteredListener {
    context: String,
    listener: Arc<dyn MessageListener>,
}

struct RegisteredPortListener {
    id: u64,
    incoming: flume::Sender<Arc<dyn Port>>,
}

/// State shared by every context of one bus.
struct Hub {
    extension_id: String,
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, RegisteredListener>,
    port_listeners: DashMap<String, RegisteredPortListener>,
}

impl Hub {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// An in-memory bus shared by the contexts of one extension.
#[derive(Clone)]
pub struct MemoryBus {
    hub: Arc<Hub>,
}

impl MemoryBus {
    /// Creates an empty bus for the given extension id.
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            hub: Arc::new(Hub {
                extension_id: extension_id.into(),
                next_id: AtomicU64::new(1),
                listeners: DashMap::new(),
                port_listeners: DashMap::new(),
            }),
        }
    }

    /// Returns a handle for the named context of this extension.
    pub fn context(&self, name: impl Into<String>) -> MemoryContext {
        let sender = MessageSender::new(self.hub.extension_id.clone(), name);
        MemoryContext {
            hub: Arc::clone(&self.hub),
            sender,
        }
    }

    /// Returns a handle for a context belonging to another extension that
    /// shares this bus.
    pub fn foreign_context(
        &self,
        extension_id: impl Into<String>,
        name: impl Into<String>,
    ) -> MemoryContext {
        MemoryContext {
            hub: Arc::clone(&self.hub),
            sender: MessageSender::new(extension_id, name),
        }
    }

    /// Id of the extension owning this bus.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.hub.extension_id
    }

    /// Number of registered message listeners, across all contexts.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.hub.listeners.len()
    }
}

impl Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("extension_id", &self.hub.extension_id)
            .field("listeners", &self.hub.listeners.len())
            .field("port_listeners", &self.hub.port_listeners.len())
            .finish()
    }
}

/// One execution context attached to a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryContext {
    hub: Arc<Hub>,
    sender: MessageSender,
}

impl MemoryContext {
    /// Name of this context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.sender.context
    }

    /// How this context identifies itself to receivers.
    #[must_use]
    pub const fn sender(&self) -> &MessageSender {
        &self.sender
    }
}

impl Debug for MemoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryContext")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// The single reply slot of one sent message, shared by every responder
/// handed out for it.
struct ReplySlot {
    tx: Mutex<Option<oneshot::Sender<Value>>>,
    open: AtomicBool,
}

impl ReplySlot {
    fn new(tx: oneshot::Sender<Value>) -> Arc<Self> {
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            open: AtomicBool::new(true),
        })
    }

    fn responder(self: &Arc<Self>) -> Responder {
        let slot = Arc::clone(self);
        Responder::new(move |value| slot.reply(value))
    }

    fn reply(&self, value: Value) -> Result<(), Error> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::PortClosed);
        }
        let tx = self.tx.lock().take().ok_or(Error::PortClosed)?;
        tx.send(value).map_err(|_| Error::PortClosed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.tx.lock().take();
    }
}

#[async_trait]
impl MessageBus for MemoryContext {
    fn extension_id(&self) -> &str {
        &self.sender.extension_id
    }

    async fn send_message(&self, message: Value) -> Result<Value, Error> {
        // Snapshot first so listeners may (un)register while being called.
        let listeners: Vec<Arc<dyn MessageListener>> = self
            .hub
            .listeners
            .iter()
            .filter(|entry| entry.value().context != self.sender.context)
            .map(|entry| Arc::clone(&entry.value().listener))
            .collect();

        if listeners.is_empty() {
            trace!("no listener outside context {}", self.sender.context);
            return Err(Error::NoReceiver);
        }

        let (tx, rx) = oneshot::channel();
        let slot = ReplySlot::new(tx);

        let mut keep_open = false;
        for listener in listeners {
            keep_open |= listener.on_message(&message, &self.sender, slot.responder());
        }

        if !keep_open {
            slot.close();
        }
        drop(slot);

        rx.await.map_err(|_| Error::PortClosed)
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.hub.next_id());
        self.hub.listeners.insert(
            id,
            RegisteredListener {
                context: self.sender.context.clone(),
                listener,
            },
        );
        debug!("context {} added message listener {:?}", self.sender.context, id);
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.hub.listeners.remove(&id).is_some();
        if removed {
            debug!("context {} removed message listener {:?}", self.sender.context, id);
        }
        removed
    }
}

#[async_trait]
impl PortConnector for MemoryContext {
    async fn connect(&self, name: &str) -> Result<Arc<dyn Port>, Error> {
        let targets: Vec<(String, flume::Sender<Arc<dyn Port>>)> = self
            .hub
            .port_listeners
            .iter()
            .filter(|entry| entry.key() != &self.sender.context)
            .map(|entry| (entry.key().clone(), entry.value().incoming.clone()))
            .collect();

        let (channel, opener) = port::Channel::open(name, self.sender.clone());

        // Every leg exists before any is delivered, so an early disconnect of
        // one receiver cannot close the opener.
        let legs: Vec<(String, MemoryPort)> = targets
            .iter()
            .map(|(context, _)| (context.clone(), channel.open_leg(self.hub.next_id())))
            .collect();

        let mut delivered = 0_usize;
        for ((context, leg), (_, incoming)) in legs.into_iter().zip(targets) {
            if incoming.send(Arc::new(leg) as Arc<dyn Port>).is_ok() {
                trace!("port {} delivered to context {}", name, context);
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!("port {} has no receiving context", name);
            return Err(Error::NoReceiver);
        }

        debug!(
            "context {} opened port {} to {} context(s)",
            self.sender.context, name, delivered
        );

        Ok(Arc::new(opener))
    }

    async fn listen(&self) -> Result<Box<dyn PortListener>, Error> {
        let (incoming, accepted) = flume::unbounded();
        let id = self.hub.next_id();

        match self.hub.port_listeners.entry(self.sender.context.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::AlreadyListening(self.sender.context.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(RegisteredPortListener { id, incoming });
            }
        }

        debug!("context {} listening for ports", self.sender.context);

        Ok(Box::new(MemoryPortListener::new(
            Arc::clone(&self.hub),
            self.sender.context.clone(),
            id,
            accepted,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc;

    struct Echo;

    impl MessageListener for Echo {
        fn on_message(&self, message: &Value, _sender: &MessageSender, responder: Responder) -> bool {
            responder.send(message.clone()).is_ok()
        }
    }

    struct Later;

    impl MessageListener for Later {
        fn on_message(&self, message: &Value, _sender: &MessageSender, responder: Responder) -> bool {
            let message = message.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let _ = responder.send(json!({ "late": message }));
            });
            true
        }
    }

    /// Declines, but tries to reply after returning.
    struct Decliner {
        outcome: mpsc::UnboundedSender<Result<(), Error>>,
    }

    impl MessageListener for Decliner {
        fn on_message(&self, _message: &Value, _sender: &MessageSender, responder: Responder) -> bool {
            let outcome = self.outcome.clone();
            tokio::spawn(async move {
                let _ = outcome.send(responder.send(json!("too late")));
            });
            false
        }
    }

    struct Forgetful;

    impl MessageListener for Forgetful {
        fn on_message(&self, _message: &Value, _sender: &MessageSender, responder: Responder) -> bool {
            drop(responder);
            true
        }
    }

    #[tokio::test]
    async fn test_no_listener() {
        let bus = MemoryBus::new("ext");
        let panel = bus.context("side-panel");

        let result = panel.send_message(json!("hello")).await;
        assert_eq!(result, Err(Error::NoReceiver));
    }

    #[tokio::test]
    async fn test_own_context_is_skipped() {
        let bus = MemoryBus::new("ext");
        let background = bus.context("background");
        background.add_listener(Arc::new(Echo));

        let result = background.send_message(json!("hello")).await;
        assert_eq!(result, Err(Error::NoReceiver));
    }

    #[tokio::test]
    async fn test_synchronous_reply() {
        let bus = MemoryBus::new("ext");
        bus.context("background").add_listener(Arc::new(Echo));

        let reply = bus.context("side-panel").send_message(json!([1, 2])).await;
        assert_eq!(reply, Ok(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_deferred_reply() {
        let bus = MemoryBus::new("ext");
        bus.context("background").add_listener(Arc::new(Later));

        let reply = bus.context("side-panel").send_message(json!("x")).await;
        assert_eq!(reply, Ok(json!({ "late": "x" })));
    }

    #[tokio::test]
    async fn test_declined_reply_path_is_closed() {
        let bus = MemoryBus::new("ext");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.context("background")
            .add_listener(Arc::new(Decliner { outcome: tx }));

        let reply = bus.context("side-panel").send_message(json!("x")).await;
        assert_eq!(reply, Err(Error::PortClosed));
        assert_eq!(rx.recv().await, Some(Err(Error::PortClosed)));
    }

    #[tokio::test]
    async fn test_dropped_responder() {
        let bus = MemoryBus::new("ext");
        bus.context("background").add_listener(Arc::new(Forgetful));

        let reply = bus.context("side-panel").send_message(json!("x")).await;
        assert_eq!(reply, Err(Error::PortClosed));
    }

    #[tokio::test]
    async fn test_first_reply_wins() {
        let bus = MemoryBus::new("ext");
        bus.context("background").add_listener(Arc::new(Later));
        bus.context("offscreen").add_listener(Arc::new(Echo));

        let reply = bus.context("side-panel").send_message(json!("x")).await;
        assert_eq!(reply, Ok(json!("x")));
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let bus = MemoryBus::new("ext");
        let background = bus.context("background");
        let id = background.add_listener(Arc::new(Echo));
        assert_eq!(bus.listener_count(), 1);

        assert!(background.remove_listener(id));
        assert!(!background.remove_listener(id));
        assert_eq!(bus.listener_count(), 0);

        let result = bus.context("side-panel").send_message(json!("x")).await;
        assert_eq!(result, Err(Error::NoReceiver));
    }

    #[tokio::test]
    async fn test_foreign_context_identity() {
        let bus = MemoryBus::new("ext");
        let foreign = bus.foreign_context("other-ext", "content-script");

        assert_eq!(foreign.extension_id(), "other-ext");
        assert_eq!(foreign.name(), "content-script");
        assert_eq!(bus.extension_id(), "ext");
    }
}
