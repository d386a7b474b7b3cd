use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Request metrics
    pub total_requests: IntCounter,
    pub failed_requests: IntCounter,
    pub request_duration: Histogram,
    pub active_requests: IntGauge,

    // Lifecycle metrics
    pub lifecycle_aborts: IntCounter,
    pub not_found_responses: IntCounter,

    // Assembly metrics
    pub compressed_responses: IntCounter,
    pub rewrite_failures: IntCounter,
    pub rewrite_handlers_skipped: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let total_requests =
            IntCounter::new("trellis_requests_total", "Total number of requests served")
                .expect("metric creation failed");
        let failed_requests = IntCounter::new(
            "trellis_requests_failed",
            "Total number of requests that ended in a 5xx response",
        )
        .expect("metric creation failed");
        let request_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "trellis_request_duration_seconds",
            "Request duration in seconds",
        ))
        .expect("metric creation failed");
        let active_requests = IntGauge::new(
            "trellis_active_requests",
            "Number of requests currently in flight",
        )
        .expect("metric creation failed");

        let lifecycle_aborts = IntCounter::new(
            "trellis_lifecycle_aborts_total",
            "Total number of lifecycle pipelines aborted by a handler failure",
        )
        .expect("metric creation failed");
        let not_found_responses = IntCounter::new(
            "trellis_not_found_responses_total",
            "Total number of requests that fell through to the not-found fallback",
        )
        .expect("metric creation failed");

        let compressed_responses = IntCounter::new(
            "trellis_compressed_responses_total",
            "Total number of responses sent gzip-compressed",
        )
        .expect("metric creation failed");
        let rewrite_failures = IntCounter::new(
            "trellis_rewrite_failures_total",
            "Total number of document rewrite passes skipped after a failure",
        )
        .expect("metric creation failed");
        let rewrite_handlers_skipped = IntCounter::new(
            "trellis_rewrite_handlers_skipped_total",
            "Total number of rewrite handlers skipped by failure isolation",
        )
        .expect("metric creation failed");

        registry.register(Box::new(total_requests.clone())).unwrap();
        registry
            .register(Box::new(failed_requests.clone()))
            .unwrap();
        registry
            .register(Box::new(request_duration.clone()))
            .unwrap();
        registry
            .register(Box::new(active_requests.clone()))
            .unwrap();
        registry
            .register(Box::new(lifecycle_aborts.clone()))
            .unwrap();
        registry
            .register(Box::new(not_found_responses.clone()))
            .unwrap();
        registry
            .register(Box::new(compressed_responses.clone()))
            .unwrap();
        registry
            .register(Box::new(rewrite_failures.clone()))
            .unwrap();
        registry
            .register(Box::new(rewrite_handlers_skipped.clone()))
            .unwrap();

        Self {
            registry,
            total_requests,
            failed_requests,
            request_duration,
            active_requests,
            lifecycle_aborts,
            not_found_responses,
            compressed_responses,
            rewrite_failures,
            rewrite_handlers_skipped,
        }
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.total_requests.inc();
        metrics.active_requests.inc();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        self.metrics
            .request_duration
            .observe(self.start.elapsed().as_secs_f64());
        self.metrics.active_requests.dec();
    }

    pub fn fail(self) {
        self.metrics
            .request_duration
            .observe(self.start.elapsed().as_secs_f64());
        self.metrics.active_requests.dec();
        self.metrics.failed_requests.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_updates_counters() {
        let metrics = Arc::new(Metrics::new());
        let timer = RequestTimer::new(metrics.clone());
        assert_eq!(metrics.active_requests.get(), 1);
        timer.finish();
        assert_eq!(metrics.active_requests.get(), 0);
        assert_eq!(metrics.total_requests.get(), 1);

        let timer = RequestTimer::new(metrics.clone());
        timer.fail();
        assert_eq!(metrics.failed_requests.get(), 1);
    }
}
