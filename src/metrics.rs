//! Prometheus metrics for s3gate.
//!
//! All metric types use atomics internally (no locks on the hot path).
//! The `Metrics` struct is `Clone`-cheap (Arc-based registry + Arc-based collectors).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for s3gate.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // -- Auth --
    pub auth_attempts_total: IntCounterVec,
    pub auth_failures_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::expect_used)]
fn register<C: prometheus::core::Collector + Clone + 'static>(registry: &Registry, c: C) -> C {
    registry
        .register(Box::new(c.clone()))
        .expect("metric names are unique");
    c
}

impl Metrics {
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let registry = Registry::new();

        // -- Process & Build --
        let process_start_time_seconds = register(
            &registry,
            Gauge::new("process_start_time_seconds", "Start time of the process")
                .expect("valid gauge"),
        );
        process_start_time_seconds.set(chrono::Utc::now().timestamp() as f64);

        let build_info = register(
            &registry,
            GaugeVec::new(
                Opts::new("s3gate_build_info", "Build information"),
                &["version", "build_time"],
            )
            .expect("valid gauge"),
        );
        build_info
            .with_label_values(&[
                env!("CARGO_PKG_VERSION"),
                option_env!("S3GATE_BUILD_TIME").unwrap_or("unknown"),
            ])
            .set(1.0);

        // Register standard process metrics (RSS, CPU, open FDs on Linux)
        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        // -- HTTP Requests --
        let http_requests_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "s3gate_http_requests_total",
                    "Total HTTP requests by method, status, and operation",
                ),
                &["method", "status", "operation"],
            )
            .expect("valid counter"),
        );

        let http_request_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "s3gate_http_request_duration_seconds",
                    "HTTP request duration in seconds",
                ),
                &["method", "operation"],
            )
            .expect("valid histogram"),
        );

        // -- Auth --
        let auth_attempts_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "s3gate_auth_attempts_total",
                    "Authenticated requests by method (sigv4, presigned-v4, presigned-v2)",
                ),
                &["method"],
            )
            .expect("valid counter"),
        );

        let auth_failures_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "s3gate_auth_failures_total",
                    "Rejected credentials by reason",
                ),
                &["reason"],
            )
            .expect("valid counter"),
        );

        Self {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            auth_attempts_total,
            auth_failures_total,
        }
    }
}

fn has_param(query: &str, name: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some(name))
}

/// Classify an S3 request into a bounded operation label.
pub fn classify_s3_operation(method: &str, path: &str, query: &str) -> &'static str {
    // Monitoring endpoints
    match path {
        "/_s3gate/health" => return "health",
        "/_s3gate/metrics" => return "metrics",
        "/_s3gate/presign" => return "presign",
        _ => {}
    }

    if has_param(query, "acl") {
        return "acl";
    }
    if has_param(query, "policy") {
        return "policy";
    }

    // Count path segments (ignoring empty segments from leading/trailing slashes)
    let segments = path.split('/').filter(|s| !s.is_empty()).count();

    match (method, segments) {
        // Root level
        ("GET", 0) => "list_buckets",
        ("HEAD", 0) => "head_root",
        // Bucket level
        ("GET", 1) if has_param(query, "uploads") => "list_multipart_uploads",
        ("GET", 1) => "list_objects",
        ("PUT", 1) => "create_bucket",
        ("DELETE", 1) => "delete_bucket",
        ("HEAD", 1) => "head_bucket",
        ("POST", 1) if has_param(query, "delete") => "delete_objects",
        ("POST", 1) => "post_bucket",
        // Object level (2+ segments = bucket + key)
        ("GET", _) if has_param(query, "uploadId") => "list_parts",
        ("PUT", _) if has_param(query, "partNumber") => "upload_part",
        ("POST", _) if has_param(query, "uploads") => "create_multipart_upload",
        ("POST", _) if has_param(query, "uploadId") => "complete_multipart_upload",
        ("DELETE", _) if has_param(query, "uploadId") => "abort_multipart_upload",
        ("GET", _) => "get_object",
        ("PUT", _) => "put_object",
        ("DELETE", _) => "delete_object",
        ("HEAD", _) => "head_object",
        ("POST", _) => "post_object",
        _ => "unknown",
    }
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let operation = classify_s3_operation(
        &method,
        request.uri().path(),
        request.uri().query().unwrap_or(""),
    );

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &status, operation])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, operation])
        .observe(duration);

    response
}

/// Handler for GET /_s3gate/metrics, in Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}
