//! Conversion between envelopes and host-bus JSON values.
//!
//! Decoding separates traffic that is not ours ([`DecodeError::Foreign`],
//! ignored by receivers) from traffic that is ours but broken
//! ([`DecodeError::Malformed`]).

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::message::{
    CallEnvelope, CorrelationId, Outcome, PROTOCOL_MARKER, ResultEnvelope, Status, TargetId,
};

/// Why a message could not be decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The message does not carry our protocol marker.
    #[error("message does not belong to this protocol")]
    Foreign,

    /// The message carries our marker but has the wrong shape.
    #[error("{0}")]
    Malformed(String),
}

/// A decoded message received on a port.
#[derive(Clone, Debug, PartialEq)]
pub enum PortMessage {
    /// A call, always carrying a correlation id.
    Call(CallEnvelope),
    /// The caller no longer needs the result of this call.
    Cancel {
        /// Target the cancelled call was addressed to.
        target_id: TargetId,
        /// Id of the cancelled call.
        correlation_id: CorrelationId,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCall {
    target_id: String,
    handler_name: String,
    #[serde(default)]
    params: Vec<Value>,
    correlation_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCancel {
    target_id: String,
    correlation_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    correlation_id: Option<String>,
    status: Status,
    value: Option<Value>,
    reason: Option<Value>,
}

/// Encodes a call envelope.
#[must_use]
pub fn encode_call(call: &CallEnvelope) -> Value {
    let mut object = Map::new();
    object.insert("proto".into(), PROTOCOL_MARKER.into());
    object.insert("targetId".into(), call.target_id.as_str().into());
    object.insert("handlerName".into(), call.handler_name.as_str().into());
    object.insert("params".into(), Value::Array(call.params.clone()));
    if let Some(correlation_id) = &call.correlation_id {
        object.insert("correlationId".into(), correlation_id.as_str().into());
    }
    Value::Object(object)
}

/// Encodes a result envelope.
#[must_use]
pub fn encode_result(result: &ResultEnvelope) -> Value {
    let mut object = Map::new();
    object.insert("proto".into(), PROTOCOL_MARKER.into());
    if let Some(correlation_id) = &result.correlation_id {
        object.insert("correlationId".into(), correlation_id.as_str().into());
    }
    match &result.outcome {
        Outcome::Fulfilled(value) => {
            object.insert("status".into(), "fulfilled".into());
            object.insert("value".into(), value.clone());
        }
        Outcome::Rejected(reason) => {
            object.insert("status".into(), "rejected".into());
            object.insert("reason".into(), reason.as_str().into());
        }
    }
    Value::Object(object)
}

/// Encodes a cancel notice for a pending persistent call.
#[must_use]
pub fn encode_cancel(target_id: &TargetId, correlation_id: &CorrelationId) -> Value {
    let mut object = Map::new();
    object.insert("proto".into(), PROTOCOL_MARKER.into());
    object.insert("targetId".into(), target_id.as_str().into());
    object.insert("correlationId".into(), correlation_id.as_str().into());
    object.insert("cancel".into(), Value::Bool(true));
    Value::Object(object)
}

fn ours(message: &Value) -> Result<&Map<String, Value>, DecodeError> {
    let object = message.as_object().ok_or(DecodeError::Foreign)?;
    match object.get("proto").and_then(Value::as_str) {
        Some(PROTOCOL_MARKER) => Ok(object),
        _ => Err(DecodeError::Foreign),
    }
}

fn malformed(error: &serde_json::Error) -> DecodeError {
    DecodeError::Malformed(error.to_string())
}

fn target_id(id: String) -> Result<TargetId, DecodeError> {
    TargetId::new(id).map_err(|_| DecodeError::Malformed("targetId is empty".into()))
}

fn correlation_id(id: String) -> Result<CorrelationId, DecodeError> {
    if id.is_empty() {
        return Err(DecodeError::Malformed("correlationId is empty".into()));
    }
    Ok(CorrelationId::from(id))
}

/// Decodes a call envelope.
///
/// # Errors
///
/// Returns [`DecodeError::Foreign`] for messages without our marker and
/// [`DecodeError::Malformed`] for calls of the wrong shape.
pub fn decode_call(message: &Value) -> Result<CallEnvelope, DecodeError> {
    ours(message)?;

    let wire = WireCall::deserialize(message).map_err(|e| malformed(&e))?;

    if wire.handler_name.is_empty() {
        return Err(DecodeError::Malformed("handlerName is empty".into()));
    }

    Ok(CallEnvelope {
        target_id: target_id(wire.target_id)?,
        handler_name: wire.handler_name,
        params: wire.params,
        correlation_id: wire.correlation_id.map(correlation_id).transpose()?,
    })
}

/// Decodes a message received by a persistent server.
///
/// # Errors
///
/// As [`decode_call`]; calls without a correlation id are malformed.
pub fn decode_port_message(message: &Value) -> Result<PortMessage, DecodeError> {
    let object = ours(message)?;

    if object.get("cancel") == Some(&Value::Bool(true)) {
        let wire = WireCancel::deserialize(message).map_err(|e| malformed(&e))?;
        return Ok(PortMessage::Cancel {
            target_id: target_id(wire.target_id)?,
            correlation_id: correlation_id(wire.correlation_id)?,
        });
    }

    let call = decode_call(message)?;
    if call.correlation_id.is_none() {
        return Err(DecodeError::Malformed("correlationId is missing".into()));
    }
    Ok(PortMessage::Call(call))
}

/// Decodes a result envelope. The marker is optional on results, but a
/// different one makes the message foreign.
///
/// # Errors
///
/// Returns [`DecodeError::Foreign`] for a mismatched marker and
/// [`DecodeError::Malformed`] for anything that is not a valid result.
pub fn decode_result(message: &Value) -> Result<ResultEnvelope, DecodeError> {
    let object = message
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("result is not an object".into()))?;

    if object
        .get("proto")
        .is_some_and(|proto| proto.as_str() != Some(PROTOCOL_MARKER))
    {
        return Err(DecodeError::Foreign);
    }

    let wire = WireResult::deserialize(message).map_err(|e| malformed(&e))?;
    let correlation_id = wire.correlation_id.map(correlation_id).transpose()?;

    let outcome = match wire.status {
        Status::Fulfilled => {
            if wire.reason.is_some() {
                return Err(DecodeError::Malformed("fulfilled result carries a reason".into()));
            }
            Outcome::Fulfilled(wire.value.unwrap_or(Value::Null))
        }
        Status::Rejected => {
            if wire.value.is_some() {
                return Err(DecodeError::Malformed("rejected result carries a value".into()));
            }
            match wire.reason {
                Some(Value::String(reason)) => Outcome::Rejected(reason),
                _ => {
                    return Err(DecodeError::Malformed(
                        "rejected result has no string reason".into(),
                    ));
                }
            }
        }
    };

    Ok(ResultEnvelope {
        correlation_id,
        outcome,
    })
}

/// Reads the correlation id of any of our messages, even a malformed one.
#[must_use]
pub fn peek_correlation_id(message: &Value) -> Option<CorrelationId> {
    ours(message)
        .ok()?
        .get("correlationId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(CorrelationId::from)
}
