//! A background controller and a side panel talking over one in-memory bus.
//!
//! The panel serves a persistent server that accepts content for the chat;
//! the background serves one-shot calls for menu state and page scraping and
//! pushes the user's selection into the panel.
//!
//! Run with `RUST_LOG=debug cargo run --example side_panel` to see every call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use courier_bus::{MessageBus, PortConnector};
use courier_bus_memory::MemoryBus;
use courier_rpc::{
    Client, EphemeralClient, EphemeralServer, HandlerRegistry, PersistentClient, PersistentServer,
    Procedure, Server, TargetId,
};
use parking_lot::Mutex;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Appends content to the chat thread of the panel.
struct AddContent;

impl Procedure for AddContent {
    const NAME: &'static str = "add";
    type Params = (String, String);
    type Output = usize;
}

/// Tells the background whether the panel is ready to receive content.
struct CanSend;

impl Procedure for CanSend {
    const NAME: &'static str = "canSend";
    type Params = (bool,);
    type Output = bool;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus = MemoryBus::new("sidekick");

    // Side panel: serves the chat thread.
    let thread = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
    let panel_registry = Arc::new(HandlerRegistry::new());
    panel_registry.register_procedure::<AddContent, _, _>({
        let thread = Arc::clone(&thread);
        move |(format, payload)| {
            let thread = Arc::clone(&thread);
            async move {
                if payload.trim().is_empty() {
                    bail!("Refusing to add empty {format} content");
                }
                let mut thread = thread.lock();
                thread.push((format, payload));
                Ok(thread.len())
            }
        }
    })?;

    let panel_connector: Arc<dyn PortConnector> = Arc::new(bus.context("side-panel"));
    let panel_server = PersistentServer::new(TargetId::new("side-panel")?, panel_registry, panel_connector);
    panel_server.start().await?;

    // Background: serves menu state and page scraping.
    let ready = Arc::new(AtomicBool::new(false));
    let background_registry = Arc::new(HandlerRegistry::new());
    background_registry.register_procedure::<CanSend, _, _>({
        let ready = Arc::clone(&ready);
        move |(is_port_initiated,)| {
            let ready = Arc::clone(&ready);
            async move {
                ready.store(is_port_initiated, Ordering::SeqCst);
                Ok(is_port_initiated)
            }
        }
    })?;
    background_registry.register("scrapePage", |params| async move {
        let tab_id = params
            .first()
            .and_then(serde_json::Value::as_u64)
            .context("tab id must be a number")?;
        Ok::<_, anyhow::Error>(json!(format!("<h1>Tab {tab_id}</h1><p>Hello from the page.</p>")))
    })?;

    let background_bus: Arc<dyn MessageBus> = Arc::new(bus.context("background"));
    let background_server =
        EphemeralServer::new(TargetId::new("background")?, background_registry, background_bus);
    background_server.start().await?;

    // The panel announces itself and pulls a page.
    let panel_bus: Arc<dyn MessageBus> = Arc::new(bus.context("side-panel"));
    let background = EphemeralClient::new(
        TargetId::new("background")?,
        ["canSend", "scrapePage"],
        panel_bus,
    );
    if !background.is_available().await {
        bail!("background is not answering");
    }
    background.call::<CanSend>((true,)).await?;

    let html = background.stub("scrapePage")?.call(vec![json!(7)]).await?;
    info!("Scraped {}", html);

    // The background pushes content into the panel.
    let background_connector: Arc<dyn PortConnector> = Arc::new(bus.context("background"));
    let panel = PersistentClient::new(TargetId::new("side-panel")?, ["add"], background_connector);
    panel.connect().await?;

    if ready.load(Ordering::SeqCst) && panel.is_available().await {
        let selection = "Rust is a multi-paradigm, general-purpose programming language.";
        let count = panel
            .call::<AddContent>(("text".into(), selection.into()))
            .await?;
        info!("Panel holds {} item(s)", count);

        let html = html.as_str().unwrap_or_default().to_string();
        let count = panel.call::<AddContent>(("html".into(), html)).await?;
        info!("Panel holds {} item(s)", count);

        match panel.call::<AddContent>(("text".into(), "  ".into())).await {
            Ok(_) => bail!("empty content was accepted"),
            Err(e) => info!("Panel refused: {}", e),
        }
    }

    panel.disconnect()?;
    background_server.shutdown().await;
    panel_server.shutdown().await;

    for (format, payload) in thread.lock().iter() {
        info!("[{}] {}", format, payload);
    }

    Ok(())
}
