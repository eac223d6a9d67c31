//! # Health & Metrics Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /healthz` | Liveness: the process is serving HTTP |
//! | `GET /readyz` | Readiness: the trial store answers within 2 seconds |
//! | `GET /metrics` | Prometheus scraping endpoint |

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::warn;

pub async fn handler_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 503 while the store is unreachable so the load balancer stops routing here.
pub async fn handler_readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check =
        tokio::time::timeout(std::time::Duration::from_secs(2), state.store.health_check()).await;

    match check {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(_)) => (StatusCode::SERVICE_UNAVAILABLE, "store unreachable"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store timeout"),
    }
}

pub async fn handler_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.prom_metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
