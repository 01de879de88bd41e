//! Prometheus metrics collection.
//!
//! Tracks HTTP request latency and counts plus git fetch and push outcomes.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request path pattern
    pub path: String,
    /// Response status code
    pub status: u16,
}

/// Git operation labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GitLabels {
    /// `git-upload-pack` or `git-receive-pack`.
    pub service: String,
    /// Outcome such as `packed`, `negotiating`, `ok` or `rejected`.
    pub outcome: String,
}

/// Global metrics state.
pub static METRICS: Lazy<MetricsState> = Lazy::new(MetricsState::new);

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// HTTP request counter.
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP request duration histogram (seconds).
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    /// Requests currently being served.
    pub http_active_requests: Gauge,
    /// Git operations by service and outcome.
    pub git_operations_total: Family<GitLabels, Counter>,
    /// Pack bytes sent to fetching clients.
    pub pack_bytes_sent_total: Counter,
    /// Commits introduced by accepted pushes.
    pub pushed_commits_total: Counter,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "knot_http_requests",
            "Total HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "knot_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_active_requests = Gauge::default();
        registry.register(
            "knot_http_active_requests",
            "Number of HTTP requests being served",
            http_active_requests.clone(),
        );

        let git_operations_total = Family::<GitLabels, Counter>::default();
        registry.register(
            "knot_git_operations",
            "Git fetch and push requests by outcome",
            git_operations_total.clone(),
        );

        let pack_bytes_sent_total = Counter::default();
        registry.register(
            "knot_pack_bytes_sent",
            "Pack bytes sent to fetching clients",
            pack_bytes_sent_total.clone(),
        );

        let pushed_commits_total = Counter::default();
        registry.register(
            "knot_pushed_commits",
            "Commits introduced by accepted pushes",
            pushed_commits_total.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            http_active_requests,
            git_operations_total,
            pack_bytes_sent_total,
            pushed_commits_total,
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a git operation.
    pub fn record_git(&self, service: &str, outcome: &str) {
        self.git_operations_total
            .get_or_create(&GitLabels {
                service: service.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// Replaces the owner and repository segments of git paths so label
/// cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    if path == "/health" || path == "/metrics" || path.starts_with("/api/") {
        return path.to_string();
    }
    let mut parts = path.trim_start_matches('/').splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(rest)) => format!("/:owner/:repo/{}", rest),
        _ => "/:other".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/api/repos"), "/api/repos");
        assert_eq!(
            normalize_path("/alice/demo.git/info/refs"),
            "/:owner/:repo/info/refs"
        );
        assert_eq!(
            normalize_path("/alice/demo/git-upload-pack"),
            "/:owner/:repo/git-upload-pack"
        );
        assert_eq!(normalize_path("/favicon.ico"), "/:other");
    }

    #[test]
    fn test_metrics_state_creation() {
        let metrics = MetricsState::new();
        metrics.record_http_request("GET", "/health", 200, 0.001);
        metrics.record_git("git-upload-pack", "packed");
        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("knot_http_requests"));
        assert!(encoded.contains("outcome=\"packed\""));
    }
}
