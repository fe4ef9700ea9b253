use std::borrow::Cow;

use metrics::Key;

/// A metric read out of a [`MetricsSource`], along with the values of its sub-metrics.
///
/// The key name may either be a plain metric name, or a name with its tags folded in, as produced by
/// [`apptuit::encode_metric`]. Labels of the key are merged over any tags decoded from the name.
#[derive(Clone, Debug, PartialEq)]
pub struct DumpedMetric {
    /// Key of the metric.
    pub key: Key,

    /// Sub-metric names and values, such as `count` for a counter.
    pub values: Vec<(Cow<'static, str>, f64)>,
}

impl DumpedMetric {
    /// Creates a new `DumpedMetric`.
    pub fn new<I, S>(key: Key, values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<Cow<'static, str>>,
    {
        Self { key, values: values.into_iter().map(|(name, value)| (name.into(), value)).collect() }
    }
}

/// A registry the reporter reads metrics from.
///
/// The recorder built by [`ApptuitExporterBuilder`](crate::ApptuitExporterBuilder) is backed by one, but any registry
/// can be reported by implementing this trait and handing it to
/// [`ApptuitExporterBuilder::build_reporter`](crate::ApptuitExporterBuilder::build_reporter).
///
/// Implementations are called from the reporter thread while other threads keep updating metrics, and must tolerate
/// that on their own.
pub trait MetricsSource: Send + Sync {
    /// Returns every metric currently registered.
    ///
    /// Sources may reset per-interval state, such as histogram samples, as part of dumping.
    fn dump(&self) -> Vec<DumpedMetric>;
}

/// A hook run at the start of every reporting cycle, before metrics are read.
///
/// Collectors take snapshots of values that are not updated as they change, such as process resource usage, and
/// record them as regular metrics.
pub trait Collector: Send + Sync {
    /// Records the current snapshot.
    fn collect(&self);
}

impl<F> Collector for F
where
    F: Fn() + Send + Sync,
{
    fn collect(&self) {
        self();
    }
}
