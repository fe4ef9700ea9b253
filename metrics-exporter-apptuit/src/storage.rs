use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
    Arc,
};

use metrics::{CounterFn, GaugeFn, HistogramFn, Key};
use metrics_util::{
    registry::Storage,
    storage::{AtomicBucket, Summary},
};

/// Percentiles reported for every histogram, along with the name of their sub-metric.
const PERCENTILES: [(&str, f64); 5] = [
    ("50_percentile", 0.5),
    ("75_percentile", 0.75),
    ("95_percentile", 0.95),
    ("99_percentile", 0.99),
    ("999_percentile", 0.999),
];

/// A monotonic counter.
///
/// The counter is never reset by reporting: every cycle reports the total since the counter was registered.
pub(crate) struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    /// Creates a new `AtomicCounter`.
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    /// Returns the current count.
    pub fn count(&self) -> u64 {
        self.value.load(Acquire)
    }
}

impl CounterFn for AtomicCounter {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.value.fetch_max(value, AcqRel);
    }
}

/// A gauge, reporting the last value written to it.
pub(crate) struct AtomicGauge {
    inner: AtomicU64,
}

impl AtomicGauge {
    /// Creates a new `AtomicGauge`.
    pub fn new() -> Self {
        Self { inner: AtomicU64::new(0.0f64.to_bits()) }
    }

    /// Returns the current value.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.inner.load(Acquire))
    }

    fn update<F>(&self, f: F)
    where
        F: Fn(f64) -> f64,
    {
        let mut current = self.inner.load(Relaxed);
        loop {
            let new = f(f64::from_bits(current)).to_bits();
            match self.inner.compare_exchange_weak(current, new, AcqRel, Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl GaugeFn for AtomicGauge {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Release);
    }
}

/// A histogram.
///
/// The number of recorded values is cumulative, like a counter. All other statistics only cover the values recorded
/// since the previous reporting cycle, as the recorded values are drained on every flush.
pub(crate) struct AtomicHistogram {
    count: AtomicU64,
    bucket: AtomicBucket<f64>,
}

impl AtomicHistogram {
    /// Creates a new `AtomicHistogram`.
    pub fn new() -> Self {
        Self { count: AtomicU64::new(0), bucket: AtomicBucket::new() }
    }

    /// Drains the values recorded since the last flush, returning the statistics to report.
    pub fn flush(&self) -> Vec<(&'static str, f64)> {
        let mut values = Vec::new();
        self.bucket.clear_with(|block| values.extend_from_slice(block));

        let mut stats = vec![("count", self.count.load(Acquire) as f64)];
        if values.is_empty() {
            return stats;
        }

        let mut summary = Summary::with_defaults();
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in &values {
            summary.add(*value);
            sum += value;
            min = min.min(*value);
            max = max.max(*value);
        }

        let n = values.len() as f64;
        let avg = sum / n;
        let std_dev = if values.len() > 1 {
            let squares: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
            (squares / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        stats.extend([("sum", sum), ("min", min), ("max", max), ("avg", avg), ("std_dev", std_dev)]);
        for (name, quantile) in PERCENTILES {
            if let Some(value) = summary.quantile(quantile) {
                stats.push((name, value));
            }
        }

        stats
    }
}

impl HistogramFn for AtomicHistogram {
    fn record(&self, value: f64) {
        self.bucket.push(value);
        self.count.fetch_add(1, Relaxed);
    }
}

/// Storage for metrics reported on a fixed interval.
///
/// # Behavior
///
/// - Counters are cumulative and report their total as `count`.
/// - Gauges report their latest value as `value`.
/// - Histograms report their cumulative `count`, plus the distribution of the values recorded since the last flush.
pub(crate) struct ReportingStorage;

impl Storage<Key> for ReportingStorage {
    type Counter = Arc<AtomicCounter>;
    type Gauge = Arc<AtomicGauge>;
    type Histogram = Arc<AtomicHistogram>;

    fn counter(&self, _: &Key) -> Self::Counter {
        Arc::new(AtomicCounter::new())
    }

    fn gauge(&self, _: &Key) -> Self::Gauge {
        Arc::new(AtomicGauge::new())
    }

    fn histogram(&self, _: &Key) -> Self::Histogram {
        Arc::new(AtomicHistogram::new())
    }
}
