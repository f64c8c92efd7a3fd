//! Transport layer for the RPC framework.
//!
//! This module binds clients and servers to the two host-bus primitives:
//! one-shot messages (ephemeral) and named ports (persistent).

mod connection;

pub mod ephemeral;
pub mod pending;
pub mod persistent_client;
pub mod persistent_server;

pub use ephemeral::{EphemeralClient, EphemeralServer};
pub use pending::{PendingCall, PendingCalls};
pub use persistent_client::{CallOptions, PersistentClient};
pub use persistent_server::PersistentServer;
