// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Web dashboard for the mock trace agent.
//!
//! Hosts a trace listener wired to an in-memory [`TraceStorage`] and serves the stored data over a
//! JSON API, with a WebSocket at `/ws` pushing every storage event as it happens.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod api;
mod ws;

use anyhow::Context;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use mock_trace_agent::{Config, EventBus, RequestHandler, TraceListener, TraceStorage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

/// Shared application state
pub struct AppState {
    pub storage: Arc<TraceStorage>,
}

/// Builds the dashboard routes over `storage`.
pub fn router(storage: Arc<TraceStorage>) -> Router {
    let state = Arc::new(AppState { storage });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/payloads", get(api::list_payloads))
        .route("/api/payloads/{id}", get(api::get_payload))
        .route("/api/payloads/{id}/raw", get(api::get_raw_bytes))
        .route("/api/payloads/{id}/messagepack", get(api::get_raw_bytes))
        .route("/api/payloads/{id}/json", get(api::get_debug_json))
        .route("/api/stats", get(api::get_stats))
        .route("/api/clear", post(api::clear_all))
        .route("/api/traces", get(api::list_traces))
        .route("/api/traces/{trace_id}", get(api::get_trace))
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves the dashboard on an already bound socket until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    storage: Arc<TraceStorage>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(storage);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("dashboard server failed")
}

/// Runs the trace listener and the dashboard until `shutdown` is cancelled.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let storage = Arc::new(TraceStorage::new(
        config.storage_options(),
        EventBus::new(config.event_capacity),
    ));

    let trace_listener = TraceListener::bind(
        config.listener_config(),
        Some(storage.clone() as Arc<dyn RequestHandler>),
    )
    .await?;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.dashboard_port));
    let dashboard = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dashboard to {addr}"))?;

    info!(
        "Mock trace agent listening on http://{}",
        trace_listener.local_addr()
    );
    info!("Dashboard available at http://{}", dashboard.local_addr()?);
    debug!("  - API at /api/*");
    debug!("  - WebSocket at /ws");

    let result = serve(dashboard, storage, shutdown).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    trace_listener.shutdown().await;
    result
}

/// Returns `{"message": message}` with the given status, logging failures.
pub(crate) fn log_and_create_json_response(message: &str, status: StatusCode) -> Response {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "mock-trace-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
