use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key};
use metrics_util::registry::Registry;

use crate::{
    source::{DumpedMetric, MetricsSource},
    storage::ReportingStorage,
};

/// Exporter state.
pub(crate) struct State {
    registry: Registry<Key, ReportingStorage>,
}

impl State {
    /// Creates a new, empty `State`.
    pub fn new() -> Self {
        State { registry: Registry::new(ReportingStorage) }
    }

    /// Returns a handle to the counter stored under `key`, creating it if needed.
    pub fn counter(&self, key: &Key) -> Counter {
        self.registry.get_or_create_counter(key, |c| Counter::from_arc(Arc::clone(c)))
    }

    /// Returns a handle to the gauge stored under `key`, creating it if needed.
    pub fn gauge(&self, key: &Key) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| Gauge::from_arc(Arc::clone(g)))
    }

    /// Returns a handle to the histogram stored under `key`, creating it if needed.
    pub fn histogram(&self, key: &Key) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| Histogram::from_arc(Arc::clone(h)))
    }
}

impl MetricsSource for State {
    fn dump(&self) -> Vec<DumpedMetric> {
        let mut metrics = Vec::new();

        for (key, counter) in self.registry.get_counter_handles() {
            metrics.push(DumpedMetric::new(key, [("count", counter.count() as f64)]));
        }

        for (key, gauge) in self.registry.get_gauge_handles() {
            metrics.push(DumpedMetric::new(key, [("value", gauge.value())]));
        }

        for (key, histogram) in self.registry.get_histogram_handles() {
            metrics.push(DumpedMetric::new(key, histogram.flush()));
        }

        metrics
    }
}
