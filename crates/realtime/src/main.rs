use std::sync::Arc;
use tracing::info;

use realtime::watcher::{TimeoutWatcher, DEFAULT_TICK_MS};
use realtime::{create_app, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let state = AppState::new().await;

    let tick_ms = std::env::var("WATCHER_TICK_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TICK_MS);
    let watcher = Arc::new(TimeoutWatcher::new(
        state.games.clone(),
        state.fabric.clone(),
        state.coordinator.clone(),
        tick_ms,
    ));
    watcher.spawn();

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listen address");
    info!("Listening on {}", bind_addr);

    axum::serve(listener, create_app(state))
        .await
        .expect("server error");
}
