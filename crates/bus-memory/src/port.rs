use crate::Hub;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use courier_bus::{Error, MessageSender, Port, PortListener};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Leg {
    tx: flume::Sender<Value>,
    closed: CancellationToken,
}

/// Shared state of one opened port: the opening side plus one leg per
/// receiving context.
pub(crate) struct Channel {
    name: String,
    opener: MessageSender,
    to_opener: flume::Sender<Value>,
    opener_closed: CancellationToken,
    legs: Mutex<HashMap<u64, Leg>>,
}

impl Channel {
    /// Creates the channel and returns it with the opener's end.
    pub(crate) fn open(name: &str, opener: MessageSender) -> (Arc<Self>, MemoryPort) {
        let (to_opener, inbox) = flume::unbounded();
        let opener_closed = CancellationToken::new();

        let channel = Arc::new(Self {
            name: name.to_string(),
            opener,
            to_opener,
            opener_closed: opener_closed.clone(),
            legs: Mutex::new(HashMap::new()),
        });

        let port = MemoryPort {
            channel: Arc::clone(&channel),
            side: Side::Opener,
            inbox,
            closed: opener_closed,
        };

        (channel, port)
    }

    /// Adds a receiving leg.
    pub(crate) fn open_leg(self: &Arc<Self>, id: u64) -> MemoryPort {
        let (tx, inbox) = flume::unbounded();
        let closed = CancellationToken::new();

        self.legs.lock().insert(
            id,
            Leg {
                tx,
                closed: closed.clone(),
            },
        );

        MemoryPort {
            channel: Arc::clone(self),
            side: Side::Leg(id),
            inbox,
            closed,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Opener,
    Leg(u64),
}

/// One end of an in-memory port.
///
/// Messages posted by the opener reach every receiving context; messages
/// posted by a receiver reach the opener only. Dropping an end disconnects it.
pub struct MemoryPort {
    channel: Arc<Channel>,
    side: Side,
    inbox: flume::Receiver<Value>,
    closed: CancellationToken,
}

#[async_trait]
impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.channel.name
    }

    fn sender(&self) -> Option<&MessageSender> {
        match self.side {
            Side::Opener => None,
            Side::Leg(_) => Some(&self.channel.opener),
        }
    }

    fn post_message(&self, message: Value) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::Disconnected);
        }

        match self.side {
            Side::Opener => {
                let legs = self.channel.legs.lock();
                if legs.is_empty() {
                    return Err(Error::Disconnected);
                }
                for leg in legs.values() {
                    // A leg whose receiver is gone is about to be removed.
                    let _ = leg.tx.send(message.clone());
                }
                Ok(())
            }
            Side::Leg(_) => {
                if self.channel.opener_closed.is_cancelled() {
                    return Err(Error::Disconnected);
                }
                self.channel
                    .to_opener
                    .send(message)
                    .map_err(|_| Error::Disconnected)
            }
        }
    }

    async fn recv(&self) -> Option<Value> {
        tokio::select! {
            biased;
            message = self.inbox.recv_async() => message.ok(),
            () = self.closed.cancelled() => None,
        }
    }

    fn disconnect(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        match self.side {
            Side::Opener => {
                let legs = std::mem::take(&mut *self.channel.legs.lock());
                for leg in legs.into_values() {
                    leg.closed.cancel();
                }
                debug!("port {} disconnected by its opener", self.channel.name);
            }
            Side::Leg(id) => {
                let mut legs = self.channel.legs.lock();
                legs.remove(&id);
                trace!("port {} leg {} disconnected", self.channel.name, id);
                if legs.is_empty() {
                    self.channel.opener_closed.cancel();
                    debug!("port {} lost its last receiver", self.channel.name);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Debug for MemoryPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPort")
            .field("name", &self.channel.name)
            .field("side", &self.side)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Accepts ports opened towards one context.
pub struct MemoryPortListener {
    hub: Arc<Hub>,
    context: String,
    id: u64,
    accepted: flume::Receiver<Arc<dyn Port>>,
    closed: AtomicBool,
}

impl MemoryPortListener {
    pub(crate) fn new(
        hub: Arc<Hub>,
        context: String,
        id: u64,
        accepted: flume::Receiver<Arc<dyn Port>>,
    ) -> Self {
        Self {
            hub,
            context,
            id,
            accepted,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PortListener for MemoryPortListener {
    async fn accept(&self) -> Option<Arc<dyn Port>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.accepted.recv_async().await.ok()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub
            .port_listeners
            .remove_if(&self.context, |_, registered| registered.id == self.id);
        // Ports queued but never accepted are dropped, which disconnects them.
        self.accepted.drain().for_each(drop);
        debug!("context {} stopped listening for ports", self.context);
    }
}

impl Drop for MemoryPortListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for MemoryPortListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPortListener")
            .field("context", &self.context)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
