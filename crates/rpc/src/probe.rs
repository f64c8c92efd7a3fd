//! Liveness probe.
//!
//! Every registry answers [`PING`] with [`PONG`]. Clients use it to tell
//! whether anything serves their target without disturbing real handlers.

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::protocol::TargetId;

/// Reserved name of the probe handler.
pub const PING: &str = "ping";

/// The only reply that counts as alive.
pub const PONG: &str = "pong";

/// Whether `value` is the probe reply.
#[must_use]
pub fn is_pong(value: &Value) -> bool {
    value.as_str() == Some(PONG)
}

/// Reduces the result of a probe call to a yes/no answer, logging why a
/// target is unavailable.
pub(crate) fn evaluate(target_id: &TargetId, result: Result<Value>) -> bool {
    match result {
        Ok(value) if is_pong(&value) => true,
        Ok(value) => {
            debug!("{} answered the probe with {}", target_id, value);
            false
        }
        Err(error) => {
            debug!("{} is not available: {}", target_id, error);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_evaluate() {
        let target = TargetId::new("background").unwrap();

        assert!(evaluate(&target, Ok(json!("pong"))));
        assert!(!evaluate(&target, Ok(json!("PONG"))));
        assert!(!evaluate(&target, Ok(json!(null))));
        assert!(!evaluate(&target, Err(Error::NotConnected("background".into()))));
    }
}
