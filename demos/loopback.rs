//! Loopback demo - drives a full session cycle with in-memory collaborators
//!
//! Run with: cargo run --example loopback
//!
//! This demo wires:
//! - an orchestrator behind a command service
//! - one page context serving element captures
//! - a capture worker launched on demand for a tab capture
//!
//! and then runs start / check / list / thumbnail / stop / tab capture /
//! teardown through the JSON command surface, the way a controller in
//! another context would.

use std::sync::Arc;

use serde_json::json;

use castbridge::loopback::{spawn_page_bridge, LoopbackCapture, LoopbackLauncher, LoopbackTransport};
use castbridge::{ContextRef, LifecycleSignal, Orchestrator, OrchestratorConfig, OrchestratorService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("castbridge=debug".parse()?)
                .add_directive("loopback=info".parse()?),
        )
        .init();

    let source = Arc::new(LoopbackCapture::new());
    let transport = Arc::new(LoopbackTransport::new());
    source.add_element("video-0", LoopbackCapture::playing_video());

    let orchestrator = Arc::new(
        Orchestrator::new(OrchestratorConfig::default()).with_worker_launcher(LoopbackLauncher::new(
            Arc::clone(&source),
            Arc::clone(&transport),
        )),
    );

    let page = ContextRef::new(1);
    spawn_page_bridge(
        orchestrator.attach_page(page),
        Arc::clone(&source),
        Arc::clone(&transport),
    );

    let (service, client) = OrchestratorService::new(Arc::clone(&orchestrator), 32);
    let service = tokio::spawn(service.run());

    let steps = [
        json!({
            "type": "start-publish",
            "session_key": "video-0",
            "context": page,
            "settings": { "room_id": "demo_room", "bitrate": 4000, "proaudio": true },
            "title": "Demo video"
        }),
        json!({ "type": "check-existing", "session_key": "video-0" }),
        json!({ "type": "capture-thumbnail", "session_key": "video-0" }),
        json!({
            "type": "start-tab-capture",
            "context": page,
            "settings": { "server": "apibackup.vdo.ninja" }
        }),
        json!({ "type": "list-active" }),
        json!({ "type": "stop-publish", "session_key": "video-0", "context": page }),
        json!({ "type": "stop-publish", "session_key": "video-0" }),
    ];

    for step in steps {
        let name = step["type"].as_str().unwrap_or("?").to_string();
        let reply = client.call_json(step).await?;
        println!("{} -> {}", name, serde_json::to_string_pretty(&reply)?);
    }

    // Closing the tab ends the tab capture the worker is still running
    orchestrator
        .directory()
        .signal_sink()
        .send(LifecycleSignal::torn_down(page))?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let reply = client.call_json(json!({ "type": "list-active" })).await?;
    println!("after teardown -> {}", reply);
    println!(
        "transport: {} publishes, {} departures, {} open connections",
        transport.publish_count(),
        transport.departures(),
        transport.open_connections()
    );

    drop(client);
    service.await?;
    Ok(())
}
