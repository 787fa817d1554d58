// src/server/metrics_server.rs

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;
use crate::core::store::Store;

/// Handles HTTP requests to the /metrics endpoint.
///
/// It updates dynamic gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(store: Arc<Store>) -> impl IntoResponse {
    crate::core::metrics::STORE_RESOURCES.set(store.len() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(
    store: Arc<Store>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = Router::new().route("/metrics", get(move || metrics_handler(store.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind metrics server");
            return;
        }
    };

    let shutdown = async move {
        let _ = shutdown_rx.recv().await;
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "metrics server failed");
    }
}
