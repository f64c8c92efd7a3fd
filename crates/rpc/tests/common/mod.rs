//! Fixtures shared by the transport tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use courier_rpc::{HandlerRegistry, Procedure, TargetId};
use serde_json::Value;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("courier_rpc=debug,courier_bus_memory=debug")
        .with_test_writer()
        .try_init();
}

pub fn target(id: &str) -> TargetId {
    TargetId::new(id).unwrap()
}

/// Sums integer parameters.
pub struct Sum;

impl Procedure for Sum {
    const NAME: &'static str = "sum";
    type Params = Vec<i64>;
    type Output = i64;
}

/// Repeats a string.
pub struct Repeat;

impl Procedure for Repeat {
    const NAME: &'static str = "repeat";
    type Params = (String, u32);
    type Output = String;
}

pub const HANDLERS: [&str; 7] = ["echo", "sum", "fail", "explode", "delay", "repeat", "ping"];

/// A registry with every handler the tests call:
/// - `echo` returns its parameters as an array
/// - `fail` rejects with its first parameter as message
/// - `explode` panics
/// - `delay(label, ms)` sleeps, then returns `label`
pub fn registry() -> Arc<HandlerRegistry> {
    let registry = Arc::new(HandlerRegistry::new());

    registry
        .register("echo", |params| async move { Ok(Value::Array(params)) })
        .unwrap();
    registry
        .register("sum", |params| async move {
            Ok(Value::from(params.iter().filter_map(Value::as_i64).sum::<i64>()))
        })
        .unwrap();
    registry
        .register("fail", |params| async move {
            let reason = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or("failed")
                .to_string();
            Err(anyhow!(reason))
        })
        .unwrap();
    registry
        .register("explode", |_| async { panic!("kaboom") })
        .unwrap();
    registry
        .register("delay", |params| async move {
            let label = params.first().cloned().unwrap_or(Value::Null);
            let millis = params.get(1).and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(label)
        })
        .unwrap();
    registry
        .register_procedure::<Repeat, _, _>(|(text, times)| async move {
            Ok(text.repeat(times as usize))
        })
        .unwrap();

    registry
}
