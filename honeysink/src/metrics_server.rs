use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub(crate) type SharedRegistry = Arc<Mutex<Registry>>;

pub(crate) fn metrics_router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Snapshot of every counter in the registry, in the OpenMetrics text format.
async fn metrics_handler(State(registry): State<SharedRegistry>) -> impl IntoResponse {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.lock()) {
        error!(?e, "Encoding metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    debug!("Exposing metrics: {:?}", buffer);
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(Body::from(buffer))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Serves `/metrics` on `port` until `cln_token` is cancelled.
pub(crate) async fn start_metrics_server(
    port: u16,
    registry: SharedRegistry,
    cln_token: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Metrics server listening");

    axum::serve(listener, metrics_router(registry))
        .with_graceful_shutdown(async move { cln_token.cancelled().await })
        .await
}
