use axum::{http::StatusCode, routing::get, Router};
use tower_http::cors::CorsLayer;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

use crate::get_metrics;

/// Handler function for the /metrics endpoint.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    let registry = {
        let metrics = get_metrics();
        metrics.registry().clone()
    };

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Serve the metrics registry over HTTP until the future is dropped.
pub async fn start_server(port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics available on http://{}/metrics", addr);
    axum::serve(listener, app).await
}
