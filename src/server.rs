//! HTTP surface for the exporter.
//!
//! Serves the Prometheus exposition endpoint plus readiness and liveness
//! probes on configurable paths. Each scrape drives every registered
//! collector concurrently; a failing collector contributes nothing that
//! cycle and the scrape still succeeds with the other collectors' samples.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::HttpConfig;
use crate::manager::{ConnectionSlot, SharedCollectors};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub collectors: SharedCollectors,
    pub registry: Registry,
    pub connection: ConnectionSlot,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState, http: &HttpConfig) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route(&http.prometheus, get(metrics_handler))
        .route(&http.health, get(readyz_handler))
        .route(&http.liveliness, get(healthz_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Prometheus exposition endpoint.
///
/// Runs one collection attempt per registered collector, concurrently, then
/// encodes the registry. Collector failures were already logged and
/// reported through the error sink.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let collectors: Vec<_> = state.collectors.read().await.clone();

    let attempts = collectors.into_iter().map(|collector| async move {
        if let Err(error) = collector.collect().await {
            tracing::debug!(
                metric = %collector.name(),
                error = %error,
                "Collector contributed no samples this scrape"
            );
        }
    });
    futures::future::join_all(attempts).await;

    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %error, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match String::from_utf8(buffer) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Encoded metrics were not valid UTF-8");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that pings MongoDB through the current connection.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.connection.read().await.clone();
    let Some(connection) = snapshot else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready".to_string(),
                db: Some("no connection".to_string()),
            }),
        )
            .into_response();
    };

    match connection.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(error.to_string()),
                }),
            )
                .into_response()
        }
    }
}
