//! Control Surface - two consumers sharing one backend session.
//!
//! This example demonstrates:
//! - Building the engine and bridge once at startup
//! - Attaching one proxy per surface and following state changes
//! - A plain request and a stream request with progress events
//! - Tearing a surface down with `destroy()`
//!
//! # Running
//!
//! Start a backend that speaks the JSON protocol on `ws://127.0.0.1:8765/`,
//! then:
//!
//! ```text
//! RUST_LOG=rpc_session=debug cargo run --example control_surface
//! ```

use std::time::Duration;

use rpc_session::{ConnectionState, ConsumerProxy, ProtocolEngine, SessionBridge};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = ProtocolEngine::builder().build()?;
    let bridge = SessionBridge::new(engine.clone());

    // Main window: drives a task and shows its progress.
    let main_window = ConsumerProxy::attach(&bridge);
    let _state = main_window.on_state(|state| tracing::info!(%state, "main window"));
    let _errors = main_window.on_error(|diagnostic| tracing::warn!(%diagnostic, "main window"));

    // Log window: only listens.
    let log_window = ConsumerProxy::attach(&bridge);
    let _log = log_window.on_notification(|event| {
        tracing::info!(method = %event.method, params = %event.params, "log window");
    });

    engine.connect();
    while main_window.state() != ConnectionState::Open {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let status = main_window.request("task.status", json!({})).await?;
    tracing::info!(%status, "Backend status");

    let outcome = main_window
        .request_stream("task.run", json!({"task": "daily"}), |event| {
            tracing::info!(params = %event.params, "progress");
        })
        .await;
    match outcome {
        Ok(result) => tracing::info!(%result, "Task finished"),
        Err(e) => tracing::warn!("Task incomplete: {}", e),
    }

    log_window.destroy();
    main_window.destroy();
    engine.shutdown();
    Ok(())
}
