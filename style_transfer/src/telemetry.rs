use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::BTreeSet;

/// Request metrics for the service. Each instance owns its registry, so
/// handlers and tests see only what was recorded through this handle.
pub struct Metrics {
    request_counter: IntCounterVec,
    request_duration: HistogramVec,
    request_rate: IntCounterVec,
    pub registry: Registry,
}

impl Metrics {
    /// Metric names keep the `flask_` prefix that existing dashboards query.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("flask_requests_total", "Total number of requests"),
            &["endpoint", "status_code"],
        )?;

        // 50ms up to 10s, finer where CPU inference usually lands
        let boundaries = generate_boundaries(&[
            (50, 250, 50),
            (250, 1000, 125),
            (1000, 5000, 500),
            (5000, 10000, 2500),
        ]);

        let request_duration = HistogramVec::new(
            HistogramOpts::new("flask_request_duration_seconds", "Request latency in seconds")
                .buckets(boundaries),
            &["endpoint"],
        )?;

        let request_rate = IntCounterVec::new(
            Opts::new(
                "flask_requests_rate_total",
                "Successful requests, rate computed by the scraper",
            ),
            &["endpoint"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(request_rate.clone()))?;

        Ok(Metrics {
            request_counter,
            request_duration,
            request_rate,
            registry,
        })
    }

    pub fn record_request(&self, endpoint: &str, status_code: u16) {
        let status_code = status_code.to_string();
        self.request_counter
            .with_label_values(&[endpoint, status_code.as_str()])
            .inc();
    }

    /// Latency and rate only track requests that produced an image.
    pub fn record_success(&self, duration_secs: f64, endpoint: &str) {
        self.request_duration
            .with_label_values(&[endpoint])
            .observe(duration_secs);
        self.request_rate.with_label_values(&[endpoint]).inc();
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Builds histogram bounds in seconds from `(start_ms, end_ms, step_ms)`
/// segments, dropping bounds shared between adjacent segments.
fn generate_boundaries(segments: &[(u64, u64, usize)]) -> Vec<f64> {
    let millis: BTreeSet<u64> = segments
        .iter()
        .flat_map(|&(start, end, step)| (start..=end).step_by(step))
        .collect();

    millis.into_iter().map(|ms| ms as f64 / 1000.0).collect()
}
