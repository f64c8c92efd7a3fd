//! Protocol layer for the RPC framework.
//!
//! This module contains the wire-level definitions:
//! - Envelope types exchanged between contexts
//! - The codec turning envelopes into host-bus JSON values and back

pub mod codec;
pub mod message;

pub use codec::{DecodeError, PortMessage};
pub use message::{
    CallEnvelope, CorrelationId, Outcome, PROTOCOL_MARKER, ResultEnvelope, Status, TargetId,
};
