//! Axum integration for exposing container health.
//!
//! Provides a router with the status endpoints an application mounts next to
//! its own routes:
//! - `GET /status/services`: the full [`HealthReport`](crate::HealthReport)
//!   as JSON, `503` when a required service is not live
//! - `GET /health`: a short liveness summary

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::container::ServiceContainer;

/// Builds the status router for a container.
///
/// # Example
///
/// ```rust,no_run
/// use ferrous_lifecycle::{axum_integration::status_router, ServiceContainer};
///
/// # async fn serve(container: ServiceContainer) {
/// let app = axum::Router::new().merge(status_router(container));
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
pub fn status_router(container: ServiceContainer) -> Router {
    Router::new()
        .route("/status/services", get(services_status))
        .route("/health", get(liveness))
        .with_state(container)
}

async fn services_status(State(container): State<ServiceContainer>) -> impl IntoResponse {
    let report = container.get_service_health().await;
    let code = if report.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn liveness(State(container): State<ServiceContainer>) -> impl IntoResponse {
    let report = container.get_service_health().await;
    let operational = report.is_operational();
    let body = json!({
        "status": if operational { "ok" } else { "unavailable" },
        "initialized": report.container.initialized,
        "ready": report.container.ready_services,
        "degraded": report.container.degraded_services,
        "failed_optional": report.failed_optional(),
    });
    let code = if operational {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
