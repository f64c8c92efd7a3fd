//! Integration tests for memory ports

use std::sync::Arc;
use std::time::Duration;

use courier_bus::{Error, Port, PortConnector};
use courier_bus_memory::MemoryBus;
use serde_json::json;
use tokio::time::timeout;
use tracing::info;

fn spawn_echo_server(listener: Box<dyn courier_bus::PortListener>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(port) = listener.accept().await {
            info!("Server accepted port {}", port.name());

            tokio::spawn(async move {
                while let Some(message) = port.recv().await {
                    if let Err(e) = port.post_message(message) {
                        info!("Server post error: {}", e);
                        break;
                    }
                }
            });
        }
    })
}

#[tokio::test]
async fn test_memory_echo_port() {
    let _ = tracing_subscriber::fmt::try_init();

    let bus = MemoryBus::new("ext");
    let panel = bus.context("side-panel");
    let background = bus.context("background");

    let listener = panel.listen().await.expect("Failed to listen");
    let server_task = spawn_echo_server(listener);

    let port = background
        .connect("side-panel")
        .await
        .expect("Failed to connect");
    assert_eq!(port.name(), "side-panel");
    assert!(port.sender().is_none());

    for i in 0..5 {
        port.post_message(json!({ "seq": i })).expect("Failed to post");
        let echoed = timeout(Duration::from_secs(1), port.recv())
            .await
            .expect("Echo timed out");
        assert_eq!(echoed, Some(json!({ "seq": i })));
    }

    port.disconnect();
    assert!(!port.is_connected());
    assert_eq!(port.post_message(json!(1)), Err(Error::Disconnected));

    server_task.abort();
}

#[tokio::test]
async fn test_connect_without_listener() {
    let bus = MemoryBus::new("ext");

    let result = bus.context("background").connect("side-panel").await;
    assert!(matches!(result, Err(Error::NoReceiver)));
}

#[tokio::test]
async fn test_receiver_sees_opener_identity() {
    let bus = MemoryBus::new("ext");
    let listener = bus.context("side-panel").listen().await.unwrap();

    let _port = bus.context("background").connect("side-panel").await.unwrap();
    let accepted = listener.accept().await.unwrap();

    let sender = accepted.sender().unwrap();
    assert_eq!(sender.extension_id, "ext");
    assert_eq!(sender.context, "background");
}

#[tokio::test]
async fn test_opener_disconnect_closes_receiver() {
    let bus = MemoryBus::new("ext");
    let listener = bus.context("side-panel").listen().await.unwrap();

    let port = bus.context("background").connect("side-panel").await.unwrap();
    let accepted = listener.accept().await.unwrap();

    port.disconnect();

    assert_eq!(accepted.recv().await, None);
    assert!(!accepted.is_connected());
    assert_eq!(accepted.post_message(json!("x")), Err(Error::Disconnected));
}

#[tokio::test]
async fn test_dropped_receiver_closes_opener() {
    let bus = MemoryBus::new("ext");
    let listener = bus.context("side-panel").listen().await.unwrap();

    let port = bus.context("background").connect("side-panel").await.unwrap();
    let accepted = listener.accept().await.unwrap();
    drop(accepted);

    assert_eq!(port.recv().await, None);
    assert!(!port.is_connected());
}

#[tokio::test]
async fn test_port_reaches_every_listening_context() {
    let bus = MemoryBus::new("ext");
    let panel_listener = bus.context("side-panel").listen().await.unwrap();
    let popup_listener = bus.context("popup").listen().await.unwrap();

    let port = bus.context("background").connect("side-panel").await.unwrap();
    let panel_end = panel_listener.accept().await.unwrap();
    let popup_end = popup_listener.accept().await.unwrap();

    port.post_message(json!("hello")).unwrap();
    assert_eq!(panel_end.recv().await, Some(json!("hello")));
    assert_eq!(popup_end.recv().await, Some(json!("hello")));

    // The opener stays connected while one receiver is left.
    popup_end.disconnect();
    assert!(port.is_connected());

    panel_end.post_message(json!("reply")).unwrap();
    assert_eq!(port.recv().await, Some(json!("reply")));

    panel_end.disconnect();
    assert_eq!(port.recv().await, None);
}

#[tokio::test]
async fn test_listen_twice() {
    let bus = MemoryBus::new("ext");
    let panel = bus.context("side-panel");

    let _listener = panel.listen().await.unwrap();
    let second = panel.listen().await;
    assert!(matches!(second, Err(Error::AlreadyListening(ref context)) if context == "side-panel"));
}

#[tokio::test]
async fn test_closed_listener() {
    let bus = MemoryBus::new("ext");
    let panel = bus.context("side-panel");
    let listener = panel.listen().await.unwrap();

    listener.close();
    assert!(listener.accept().await.is_none());

    let result = bus.context("background").connect("side-panel").await;
    assert!(matches!(result, Err(Error::NoReceiver)));

    // The context may listen again once closed.
    let _listener = panel.listen().await.unwrap();
}

#[tokio::test]
async fn test_unaccepted_port_is_disconnected_on_close() {
    let bus = MemoryBus::new("ext");
    let listener = bus.context("side-panel").listen().await.unwrap();

    let port: Arc<dyn Port> = bus.context("background").connect("side-panel").await.unwrap();
    listener.close();

    assert_eq!(port.recv().await, None);
}
