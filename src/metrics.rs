use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus_client::{
    encoding::{text, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use tracing::error;

const SCRAPE_PATH: &str = "/metrics";
const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";
const DURATION_BUCKETS: [f64; 6] = [0.1, 0.5, 1.0, 1.5, 2.0, 5.0];

/// Label used when a request matched no route, so arbitrary unknown paths
/// collapse into a single series instead of growing the label space.
const UNMATCHED: &str = "unmatched";

/// `path` is always the matched route template (`/chats/{id}`), never the
/// interpolated request path; raw paths would mint one series per id.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub path: String,
    pub status_code: String,
}

/// Request telemetry for the whole process. Construct exactly once at
/// startup and hand clones to the middleware and scrape handler; a second
/// construction would register a second, disjoint set of series.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    request_counter: Family<RequestLabels, Counter>,
    request_duration: Family<RequestLabels, Histogram>,
    resident_memory: Gauge,
    virtual_memory: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let request_counter = Family::<RequestLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total number of HTTP requests",
            request_counter.clone(),
        );

        let request_duration =
            Family::<RequestLabels, Histogram>::new_with_constructor(duration_histogram);
        registry.register(
            "http_request_duration_seconds",
            "Duration of HTTP requests in seconds",
            request_duration.clone(),
        );

        let resident_memory = Gauge::default();
        registry.register(
            "process_resident_memory_bytes",
            "Resident memory size in bytes",
            resident_memory.clone(),
        );

        let virtual_memory = Gauge::default();
        registry.register(
            "process_virtual_memory_bytes",
            "Virtual memory size in bytes",
            virtual_memory.clone(),
        );

        let start_time: Gauge = Gauge::default();
        start_time.set(crate::now_unix());
        registry.register(
            "process_start_time_seconds",
            "Start time of the process since unix epoch in seconds",
            start_time,
        );

        Self {
            inner: Arc::new(Inner {
                registry,
                request_counter,
                request_duration,
                resident_memory,
                virtual_memory,
            }),
        }
    }

    fn observe(&self, labels: RequestLabels, seconds: f64) {
        self.inner.request_counter.get_or_create(&labels).inc();
        self.inner
            .request_duration
            .get_or_create(&labels)
            .observe(seconds);
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        if let Some((virt, resident)) = read_statm() {
            self.inner.virtual_memory.set(virt);
            self.inner.resident_memory.set(resident);
        }

        let mut buffer = String::new();
        text::encode(&mut buffer, &self.inner.registry)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS.iter().copied())
}

/// Sizes from /proc/self/statm come in pages, assumed 4 KiB.
fn read_statm() -> Option<(i64, i64)> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let virt: i64 = fields.next()?.parse().ok()?;
    let resident: i64 = fields.next()?.parse().ok()?;
    Some((virt * 4096, resident * 4096))
}

/// Request boundary: counts and times every request, labeled by method,
/// route template and final status. The scrape route itself is skipped to
/// avoid a self-referential series.
pub async fn track(
    State(metrics): State<Metrics>,
    matched_path: Option<MatchedPath>,
    req: Request,
    next: Next,
) -> Response {
    let path = matched_path
        .map(|m| m.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED.to_owned());
    if path == SCRAPE_PATH {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let start = Instant::now();
    let response = next.run(req).await;

    metrics.observe(
        RequestLabels {
            method,
            path,
            status_code: response.status().as_u16().to_string(),
        },
        start.elapsed().as_secs_f64(),
    );

    response
}

pub async fn scrape(State(metrics): State<Metrics>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            error!(%err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
