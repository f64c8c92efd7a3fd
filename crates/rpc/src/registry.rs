//! Handler registry.
//!
//! Maps handler names to async functions of positional JSON parameters.
//! Handlers can be registered by name, or through a [`Procedure`] type that
//! fixes the name and the parameter and output types at compile time.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::probe::{PING, PONG};

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// A registered handler.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// A remote procedure known by type on both sides of a call.
///
/// `Params` is carried as the positional parameter array, so it is usually a
/// tuple: `(String, u32)` travels as `["..", 7]` and `()` as `[]`.
///
/// ```
/// use courier_rpc::Procedure;
///
/// struct AddContent;
///
/// impl Procedure for AddContent {
///     const NAME: &'static str = "add";
///     type Params = (String, String);
///     type Output = bool;
/// }
/// ```
pub trait Procedure: Send + Sync + 'static {
    /// Handler name on the wire.
    const NAME: &'static str;

    /// Positional parameters.
    type Params: Serialize + DeserializeOwned + Send + 'static;

    /// Returned value.
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// Converts typed parameters into the positional parameter array.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if `params` cannot be serialized.
pub fn params_to_vec<T: Serialize>(params: &T) -> Result<Vec<Value>> {
    Ok(match serde_json::to_value(params)? {
        Value::Array(params) => params,
        Value::Null => Vec::new(),
        single => vec![single],
    })
}

/// Converts the positional parameter array into typed parameters.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the parameters do not fit `T`.
pub fn params_from_vec<T: DeserializeOwned>(params: Vec<Value>) -> Result<T> {
    if params.is_empty() {
        return serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Array(params)))
            .map_err(Error::from);
    }

    let single = if params.len() == 1 {
        params.first().cloned()
    } else {
        None
    };
    match serde_json::from_value(Value::Array(params)) {
        Ok(params) => Ok(params),
        Err(error) => match single {
            Some(single) => serde_json::from_value(single).map_err(|_| Error::Serialization(error)),
            None => Err(error.into()),
        },
    }
}

/// Named handlers served by one server.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    /// Creates a registry holding only the probe handler.
    #[must_use]
    pub fn new() -> Self {
        let ping: Handler =
            Arc::new(|_: Vec<Value>| async { Ok::<_, anyhow::Error>(Value::from(PONG)) }.boxed());

        Self {
            handlers: RwLock::new(HashMap::from([(PING.to_string(), ping)])),
        }
    }

    /// Registers a handler under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty name and
    /// [`Error::DuplicateHandler`] if the name is taken, including by the
    /// reserved probe handler.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params| handler(params).boxed());
        self.insert(name.into(), handler)
    }

    /// Registers a typed handler under [`Procedure::NAME`].
    ///
    /// Parameters that do not decode into `P::Params` reject the call.
    ///
    /// # Errors
    ///
    /// As [`HandlerRegistry::register`].
    pub fn register_procedure<P, F, Fut>(&self, handler: F) -> Result<()>
    where
        P: Procedure,
        F: Fn(P::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P::Output>> + Send + 'static,
    {
        self.register(P::NAME, move |params| {
            let call = params_from_vec::<P::Params>(params).map(&handler);
            async move {
                let output = call?.await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(output)?)
            }
        })
    }

    fn insert(&self, name: String, handler: Handler) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName(name));
        }

        match self.handlers.write().entry(name) {
            Entry::Occupied(entry) => Err(Error::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!("registered handler {}", entry.key());
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    struct Concat;

    impl Procedure for Concat {
        const NAME: &'static str = "concat";
        type Params = (String, u32);
        type Output = String;
    }

    #[test]
    fn test_ping_is_reserved() {
        let registry = HandlerRegistry::new();
        assert!(registry.contains(PING));

        let result = registry.register(PING, |_| async { Ok(json!("mine")) });
        assert!(matches!(result, Err(Error::DuplicateHandler(name)) if name == PING));
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let registry = HandlerRegistry::new();

        assert!(matches!(
            registry.register("", |_| async { Ok(Value::Null) }),
            Err(Error::InvalidName(_))
        ));

        registry.register("echo", |params| async move { Ok(json!(params)) }).unwrap();
        assert!(matches!(
            registry.register("echo", |_| async { Ok(Value::Null) }),
            Err(Error::DuplicateHandler(_))
        ));

        assert_eq!(registry.names(), vec!["echo".to_string(), PING.to_string()]);
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let registry = HandlerRegistry::new();
        let ping = registry.get(PING).unwrap();
        assert_eq!(ping(vec![json!("ignored")]).await.unwrap(), json!(PONG));
    }

    #[tokio::test]
    async fn test_procedure_handler() {
        let registry = HandlerRegistry::new();
        registry
            .register_procedure::<Concat, _, _>(|(text, times)| async move {
                Ok(text.repeat(times as usize))
            })
            .unwrap();

        let handler = registry.get(Concat::NAME).unwrap();
        assert_eq!(handler(vec![json!("ab"), json!(3)]).await.unwrap(), json!("ababab"));
        assert!(handler(vec![json!(3)]).await.is_err());
    }

    #[test]
    fn test_params_conversion() {
        assert_eq!(params_to_vec(&("a", 1)).unwrap(), vec![json!("a"), json!(1)]);
        assert_eq!(params_to_vec(&()).unwrap(), Vec::<Value>::new());
        assert_eq!(params_to_vec(&"solo").unwrap(), vec![json!("solo")]);

        let (): () = params_from_vec(vec![]).unwrap();

        let pair: (String, u32) = params_from_vec(vec![json!("a"), json!(1)]).unwrap();
        assert_eq!(pair, ("a".to_string(), 1));

        let solo: String = params_from_vec(vec![json!("solo")]).unwrap();
        assert_eq!(solo, "solo");

        let list: Vec<u8> = params_from_vec(vec![]).unwrap();
        assert!(list.is_empty());
    }
}
