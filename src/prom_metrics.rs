//! # Prometheus Metrics: Exposition for Scrapers
//!
//! Exposes service metrics in the Prometheus text exposition format.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `randomise_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//! | `randomise_reports_recorded_total` | Counter | `style` | Reports written, by variable style |
//! | `randomise_joins_total` | Counter | `outcome` | Join attempts by outcome |
//! | `randomise_trials_closed_total` | Counter | `reason` | Trials finished, by reason |
//!
//! `path` labels are normalised (`/trial/42/report` → `/trial/:id/report`) so
//! the histogram does not grow a series per trial.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StyleLabel {
    pub style: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabel {
    pub reason: String,
}

type HistogramFamily = Family<HttpLabel, Histogram, fn() -> Histogram>;

fn duration_histogram() -> Histogram {
    // 5ms .. ~10s
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Metrics registry shared by all request handlers.
///
/// Every metric is atomic; handlers update them without locking.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: HistogramFamily,
    pub reports_recorded: Family<StyleLabel, Counter>,
    pub joins: Family<OutcomeLabel, Counter>,
    pub trials_closed: Family<ReasonLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration: HistogramFamily =
            Family::new_with_constructor(duration_histogram as fn() -> Histogram);
        registry.register(
            "randomise_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration.clone(),
        );

        let reports_recorded = Family::<StyleLabel, Counter>::default();
        registry.register(
            "randomise_reports_recorded",
            "Reports recorded by variable style",
            reports_recorded.clone(),
        );

        let joins = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "randomise_joins",
            "Join attempts by outcome",
            joins.clone(),
        );

        let trials_closed = Family::<ReasonLabel, Counter>::default();
        registry.register(
            "randomise_trials_closed",
            "Trials finished by reason",
            trials_closed.clone(),
        );

        Self {
            registry,
            http_request_duration,
            reports_recorded,
            joins,
            trials_closed,
        }
    }

    pub fn record_report(&self, style: &str) {
        self.reports_recorded
            .get_or_create(&StyleLabel {
                style: style.to_string(),
            })
            .inc();
    }

    pub fn record_join(&self, outcome: &str) {
        self.joins
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_close(&self, reason: &str) {
        self.trials_closed
            .get_or_create(&ReasonLabel {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse numeric ids and UUIDs in a path into placeholders.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
