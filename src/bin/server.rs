//! HIVEMIND HTTP server binary.
//!
//! Starts the orchestration backend: agent pool, router, dispatcher,
//! coordinator, engine adapters, and the axum submission surface.
//!
//! # Environment Variables
//!
//! - `HIVEMIND_BIND_ADDR` — bind address (default: 0.0.0.0:8600)
//! - `HIVEMIND_PRIMARY_CLI` / `HIVEMIND_CONSULTANT_CLI` — engine binaries
//! - `HIVEMIND_MAX_GLOBAL_CONCURRENT` — dispatcher global limit
//! - `RUST_LOG` — tracing filter (default: "info,hivemind=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use hivemind::server::app_router;
use hivemind::Application;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hivemind=debug".into()),
        )
        .init();

    let app = Arc::new(Application::from_env());
    app.start();

    let bind_addr = app.settings.bind_addr.clone();
    let router = app_router(app.clone());

    tracing::info!("hivemind server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health          — liveness probe");
    tracing::info!("  GET  /metrics         — Prometheus exposition");
    tracing::info!("  POST /v1/completions  — submit a prompt");
    tracing::info!("  GET  /v1/ws           — task event stream");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, router)
        .with_graceful_shutdown({
            let app = app.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
                app.shutdown().await;
            }
        })
        .await
        .expect("Server failed");
}
