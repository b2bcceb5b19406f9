//! Operator HTTP endpoint
//!
//! Serves the registry and carbon counters in Prometheus text format on
//! `/metrics`, plus a trivial `/health`.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use memtank_mdata::AggMetrics;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::carbon::CarbonStats;

#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<AggMetrics>,
    pub carbon: Arc<CarbonStats>,
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let mut body = state.registry.stats().export_prometheus();
    body.push_str(&state.carbon.export_prometheus());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("http: serving /metrics on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
