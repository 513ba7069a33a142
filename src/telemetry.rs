use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-lifetime request counters. Reset only by restart; never persisted.
pub struct Metrics {
    request_count: AtomicU64,
    total_latency_micros: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub average_latency_seconds: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            request_count: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
        }
    }

    /// Records one finished request. Both updates happen at completion, so a
    /// request never observes itself in `/metrics`; the two counters are
    /// atomic individually, not as a pair.
    pub fn record_request(&self, latency: Duration) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let total_latency_micros = self.total_latency_micros.load(Ordering::Relaxed);

        let average = if request_count > 0 {
            total_latency_micros as f64 / 1_000_000. / request_count as f64
        } else {
            0.
        };

        MetricsSnapshot {
            request_count,
            average_latency_seconds: (average * 10_000.).round() / 10_000.,
        }
    }
}

/// Wraps every route: logs arrival and completion, times the request, and
/// commits the counters once the response is ready.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    tracing::info!("Incoming request: {} {}", method, path);
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    metrics.record_request(latency);
    tracing::info!(
        "Completed {} status={} latency={:.3}s",
        path,
        response.status().as_u16(),
        latency.as_secs_f64()
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_of_fresh_metrics_is_zero() {
        let metrics = Metrics::new();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.average_latency_seconds, 0.0);
    }

    #[test]
    fn snapshot_averages_recorded_latencies() {
        let metrics = Metrics::new();
        metrics.record_request(Duration::from_millis(250));
        metrics.record_request(Duration::from_millis(250));

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.average_latency_seconds, 0.25);
    }

    #[test]
    fn snapshot_rounds_average_to_four_decimals() {
        let metrics = Metrics::new();
        metrics.record_request(Duration::from_micros(123_456));

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.average_latency_seconds, 0.1235);
    }

    #[test]
    fn counters_never_decrease() {
        let metrics = Metrics::new();
        let mut last_count = 0;

        for _ in 0..5 {
            metrics.record_request(Duration::from_millis(1));
            let snapshot = metrics.snapshot();
            assert!(snapshot.request_count > last_count);
            last_count = snapshot.request_count;
        }
    }
}
