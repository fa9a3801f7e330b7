//! HTTP surface: health checks, pipeline stats and management messages.

use crate::client::ClientControl;
use crate::dao::BatchDao;
use crate::ingest::ServiceManagementHandler;
use crate::pipeline::PipelineState;
use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{info_span, warn, Instrument};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub client: Arc<dyn ClientControl>,
    pub batch_dao: Arc<dyn BatchDao>,
    pub management: Arc<ServiceManagementHandler>,
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/pipeline/stats", get(pipeline_stats))
        .route("/v1/management/:key", post(management_message))
        .with_state(state)
        .layer(middleware::from_fn(http_observability_middleware))
}

/// 200 while the storage backend is reachable, 503 otherwise.
async fn health_check(State(state): State<ApiState>) -> Response {
    if state.client.is_healthy() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY").into_response()
    }
}

/// Ready when healthy and the pipeline still accepts writes.
async fn ready_check(State(state): State<ApiState>) -> Response {
    if state.client.is_healthy() && state.batch_dao.state() != PipelineState::Closed {
        (StatusCode::OK, "READY").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response()
    }
}

async fn pipeline_stats(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let pipeline_state = match state.batch_dao.state() {
        PipelineState::Open => "open",
        PipelineState::Flushing => "flushing",
        PipelineState::Closed => "closed",
    };
    Json(json!({
        "backend": state.client.backend(),
        "state": pipeline_state,
        "stats": state.batch_dao.stats(),
    }))
}

/// Accepts one registration (`register-*` key) or heartbeat message.
async fn management_message(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    match state.management.handle(&key, &body) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            warn!(key = %key, error = %e, "Rejected management message");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

struct HttpInstruments {
    request_count: Counter<u64>,
    request_duration_seconds: Histogram<f64>,
    request_errors: Counter<u64>,
}

fn http_instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("telestore.api.http");
        HttpInstruments {
            request_count: meter
                .u64_counter("http.server.request.count")
                .with_description("Total number of HTTP requests handled by the telestore API")
                .init(),
            request_duration_seconds: meter
                .f64_histogram("http.server.request.duration")
                .with_description("HTTP request duration")
                .with_unit("s")
                .init(),
            request_errors: meter
                .u64_counter("http.server.request.errors")
                .with_description("HTTP requests with 4xx/5xx status codes")
                .init(),
        }
    })
}

async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route
    );
    let response = next.run(req).instrument(span).await;
    let status = response.status().as_u16();
    let attrs = [
        KeyValue::new("http.request.method", method),
        KeyValue::new("http.route", route),
        KeyValue::new("http.response.status_code", status as i64),
    ];
    let instruments = http_instruments();

    instruments.request_count.add(1, &attrs);
    instruments
        .request_duration_seconds
        .record(start.elapsed().as_secs_f64(), &attrs);
    if status >= 400 {
        instruments.request_errors.add(1, &attrs);
    }

    response
}
