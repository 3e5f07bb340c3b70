use std::sync::{Arc, OnceLock};

use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Prometheus-backed counters for planner analysis and pipeline execution.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    operator_rows_in: CounterVec,
    operator_rows_out: CounterVec,
    operator_time_seconds: HistogramVec,
    metadata_requests: CounterVec,
    partition_filters: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_operator(
        &self,
        query_id: &str,
        operator: &str,
        rows_in: u64,
        rows_out: u64,
        secs: f64,
    ) {
        let labels = [query_id, operator];
        self.inner
            .operator_rows_in
            .with_label_values(&labels)
            .inc_by(rows_in as f64);
        self.inner
            .operator_rows_out
            .with_label_values(&labels)
            .inc_by(rows_out as f64);
        self.inner
            .operator_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    /// Counts one metadata request; `outcome` is `hit`, `miss` or `uncached`.
    pub fn record_metadata_request(&self, kind: &str, outcome: &str) {
        self.inner
            .metadata_requests
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn record_partition_filter(&self, table: &str, values: u64) {
        self.inner
            .partition_filters
            .with_label_values(&[table])
            .inc_by(values as f64);
    }

    /// Text exposition format of every registered family.
    pub fn render_prometheus(&self) -> String {
        let mut buf = Vec::new();
        match TextEncoder::new().encode(&self.inner.registry.gather(), &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const OPERATOR_LABELS: &[&str] = &["query_id", "operator"];

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let operator_rows_in = register(
            &registry,
            CounterVec::new(
                Opts::new("quarry_operator_rows_in_total", "Input rows processed per operator"),
                OPERATOR_LABELS,
            ),
        );
        let operator_rows_out = register(
            &registry,
            CounterVec::new(
                Opts::new("quarry_operator_rows_out_total", "Output rows produced per operator"),
                OPERATOR_LABELS,
            ),
        );
        let operator_time_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new("quarry_operator_time_seconds", "Wall time per operator unit"),
                OPERATOR_LABELS,
            ),
        );
        let metadata_requests = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "quarry_metadata_requests_total",
                    "Metadata requests per kind and cache outcome",
                ),
                &["kind", "outcome"],
            ),
        );
        let partition_filters = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "quarry_partition_filter_values_total",
                    "Literal partition values collected by plan-shape analysis",
                ),
                &["table"],
            ),
        );
        Self {
            registry,
            operator_rows_in,
            operator_rows_out,
            operator_time_seconds,
            metadata_requests,
            partition_filters,
        }
    }
}

// Metric names and label sets are constants, so failures here are programming errors.
fn register<C>(registry: &Registry, metric: prometheus::Result<C>) -> C
where
    C: Collector + Clone + 'static,
{
    let metric = metric.expect("valid metric definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("metric names are unique within the registry");
    metric
}

/// Process-wide registry shared by planner and execution.
pub fn global_metrics() -> &'static MetricsRegistry {
    static METRICS: OnceLock<MetricsRegistry> = OnceLock::new();
    METRICS.get_or_init(MetricsRegistry::new)
}
