//! Inter-context RPC for browser extensions.
//!
//! An extension runs in isolated contexts (a background controller, a side
//! panel, ...) that share no memory and only talk through the host bus. This
//! crate layers named, awaitable remote calls on top of that bus.
//!
//! # Features
//!
//! - **Two transports**: one-shot messages ([`EphemeralServer`],
//!   [`EphemeralClient`]) and long-lived named ports ([`PersistentServer`],
//!   [`PersistentClient`])
//! - **Correlation**: many concurrent calls share one port, each settled by
//!   its own result
//! - **Timeouts and cancellation** per call on the persistent transport
//! - **Failure propagation**: handler errors and panics reach the caller as
//!   [`Error::Rejected`] carrying the original message
//! - **Liveness probe**: every server answers `ping`, see
//!   [`Client::is_available`]
//! - **Typed calls** through the [`Procedure`] trait
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_bus::MessageBus;
//! use courier_rpc::{Client, EphemeralClient, EphemeralServer, HandlerRegistry, Server, TargetId};
//! use serde_json::json;
//!
//! async fn example(
//!     background: Arc<dyn MessageBus>,
//!     panel: Arc<dyn MessageBus>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(HandlerRegistry::new());
//!     registry.register("getTitle", |_| async { Ok(json!("Example Domain")) })?;
//!
//!     let server = EphemeralServer::new(TargetId::new("background")?, registry, background);
//!     server.start().await?;
//!
//!     let client = EphemeralClient::new(TargetId::new("background")?, ["getTitle"], panel);
//!     let title = client.stub("getTitle")?.call(vec![]).await?;
//!     assert_eq!(title, json!("Example Domain"));
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use client::{Client, Stub};
pub use config::{ClientConfig, RpcConfig, ServerConfig};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{
    CallEnvelope, CorrelationId, Outcome, PROTOCOL_MARKER, ResultEnvelope, Status, TargetId,
    codec,
};
pub use registry::{Handler, HandlerRegistry, Procedure};
pub use server::Server;
pub use transport::{
    CallOptions, EphemeralClient, EphemeralServer, PendingCall, PendingCalls, PersistentClient,
    PersistentServer,
};
