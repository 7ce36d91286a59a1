//! Prometheus metrics endpoint and HTTP request tracking middleware.

use anyhow::Result;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::LoanStatus;
use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const LOANS_APPLIED_TOTAL: &str = "loans_applied_total";
pub const LOAN_DECISIONS_TOTAL: &str = "loan_decisions_total";
pub const LOANS_PENDING: &str = "loans_pending";

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Call once during startup.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(LOANS_APPLIED_TOTAL, "Total number of loan applications");
    describe_counter!(
        LOAN_DECISIONS_TOTAL,
        "Total number of loan decisions by outcome (approved/rejected)"
    );
    describe_gauge!(LOANS_PENDING, "Number of loans awaiting a decision");

    Ok(handle)
}

/// GET /metrics - Prometheus text format, no authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM loans WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await
    {
        gauge!(LOANS_PENDING).set(count as f64);
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Route template (e.g. /loans/:id) rather than the raw path
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path)
        .record(duration);

    response
}

/// Record a new loan application.
pub fn record_loan_applied() {
    counter!(LOANS_APPLIED_TOTAL).increment(1);
}

/// Record an approve/reject decision.
pub fn record_loan_decision(status: LoanStatus) {
    counter!(LOAN_DECISIONS_TOTAL, "status" => status.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(HTTP_REQUESTS_TOTAL.ends_with("_total"));
        assert!(LOANS_APPLIED_TOTAL.ends_with("_total"));
        assert!(LOAN_DECISIONS_TOTAL.ends_with("_total"));
        assert!(HTTP_REQUEST_DURATION_SECONDS.ends_with("_seconds"));
    }
}
