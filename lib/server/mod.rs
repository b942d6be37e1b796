pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use monitoring::LOADER_METRICS;
use std::net::SocketAddr;
use std::sync::Arc;

async fn health_handler() -> &'static str {
    "Healthy"
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Registers metric families once per process. Safe to call before the server starts so
/// workers can record from their first message.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;
    if LOADER_METRICS.initialized() {
        return;
    }
    LOADER_METRICS
        .get_or_init(|| async { monitoring::LoaderMetrics::register(&mut registry, "loader") })
        .await;
    monitoring::register_build_info_metric(&mut registry, "worker");
}

/// Starts the health/metrics HTTP server on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = served {
            tracing::error!(
                event = "metrics_server_failed",
                error = %err,
                "metrics server exited with an error"
            );
        }
    });

    Ok(server_handle)
}
