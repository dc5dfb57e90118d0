//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! Metrics are emitted as tracing events under the `study_guide::metrics`
//! target, to be aggregated from logs:
//!
//! - `request_metric` - path pattern, method, status and latency per request
//! - `access_denial_metric` - premium detail denials by viewer kind
//! - `refinement_metric` - refinement outcomes by provider and difficulty

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use regex_lite::Regex;
use tracing::info;

use crate::types::{DifficultyLevel, Provider, Viewer};

/// Metrics middleware that records request counts and latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    info!(
        target: "study_guide::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request_metric"
    );

    response
}

fn numeric_segment() -> Option<&'static Regex> {
    static SEGMENT: OnceLock<Option<Regex>> = OnceLock::new();
    SEGMENT.get_or_init(|| Regex::new(r"/[0-9]+(/|$)").ok()).as_ref()
}

/// Replace numeric path segments with `:id` to bound cardinality.
pub(crate) fn normalize_path(path: &str) -> String {
    let Some(segment) = numeric_segment() else {
        return path.to_string();
    };
    // Adjacent ids share a slash, so one pass can leave every other one.
    let once = segment.replace_all(path, "/:id$1");
    segment.replace_all(&once, "/:id$1").into_owned()
}

/// Record a premium detail denial.
pub fn record_access_denial(viewer: &Viewer) {
    let viewer_kind = match viewer {
        Viewer::Anonymous => "anonymous",
        Viewer::UnknownPremium(_) => "unknown_premium",
        Viewer::Premium(_) => "premium",
        Viewer::Admin(_) => "admin",
    };
    info!(
        target: "study_guide::metrics",
        metric_type = "access_denial",
        viewer = viewer_kind,
        "access_denial_metric"
    );
}

/// Record a refinement outcome.
pub fn record_refinement(provider: Provider, difficulty: DifficultyLevel, success: bool) {
    info!(
        target: "study_guide::metrics",
        metric_type = "refinement",
        provider = %provider,
        difficulty = %difficulty,
        result = if success { "completed" } else { "failed" },
        "refinement_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_ids() {
        assert_eq!(normalize_path("/api/topics/42"), "/api/topics/:id");
        assert_eq!(
            normalize_path("/api/admin/topics/7/assignments/13"),
            "/api/admin/topics/:id/assignments/:id"
        );
        assert_eq!(normalize_path("/api/a/1/2/3"), "/api/a/:id/:id/:id");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(normalize_path("/api/v2thing"), "/api/v2thing");
    }
}
