//! Abstract interface over the host-provided extension message bus.
//!
//! The hosting platform gives every extension context two messaging
//! primitives. This crate describes them as traits; concrete buses (the
//! in-memory one in `courier-bus-memory`, or a binding to the real host) live
//! in separate crates.
//!
//! Buses provide:
//! - One-shot messages with at most one reply, delivered to every listener of
//!   the other contexts ([`MessageBus`], [`MessageListener`], [`Responder`])
//! - Named long-lived duplex ports shared by many messages ([`PortConnector`],
//!   [`Port`], [`PortListener`])
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Error types shared by all bus implementations.
pub mod error;

/// The one-shot request/reply primitive.
pub mod ephemeral;

/// The persistent duplex channel primitive.
pub mod port;

pub use ephemeral::{ListenerId, MessageBus, MessageListener, MessageSender, Responder};
pub use error::Error;
pub use port::{Port, PortConnector, PortListener};
