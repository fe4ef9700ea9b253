use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use apptuit::{Apptuit, DataPoint, DecodeCache, Error, SendOutcome, Tags};
use metrics::Key;
use tracing::{debug, error, warn};

use crate::{
    source::{Collector, DumpedMetric, MetricsSource},
    telemetry::Telemetry,
};

pub(crate) type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Reporter configuration.
pub(crate) struct ReporterConfiguration {
    pub interval: Duration,
    pub prefix: String,
    pub collectors: Vec<Box<dyn Collector>>,
    pub error_handler: Option<ErrorHandler>,
}

/// Reads metrics from a [`MetricsSource`] and sends them to Apptuit.
///
/// Each reported metric produces one datapoint per sub-metric, named `<prefix><name>.<sub-metric>`. Alongside the
/// reported metrics, the reporter tracks how many points it attempted to send, how many were accepted or rejected, and
/// how long sending took, under the `apptuit.reporter.send` namespace.
///
/// [`report_now`](Reporter::report_now) can be called from any thread, including while the background reporter built
/// by [`ApptuitExporterBuilder`](crate::ApptuitExporterBuilder) is running.
pub struct Reporter {
    client: Apptuit,
    source: Arc<dyn MetricsSource>,
    config: ReporterConfiguration,
    decode_cache: DecodeCache,
    telemetry: Telemetry,
}

impl Reporter {
    pub(crate) fn new(client: Apptuit, source: Arc<dyn MetricsSource>, config: ReporterConfiguration) -> Self {
        Reporter { client, source, config, decode_cache: DecodeCache::default(), telemetry: Telemetry::new() }
    }

    /// Returns the client used to send metrics.
    pub fn client(&self) -> &Apptuit {
        &self.client
    }

    /// Returns the interval at which the background reporter runs.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Returns the prefix applied to every reported metric name.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Runs a single reporting cycle.
    ///
    /// `timestamp` defaults to the current time, in seconds since the Unix epoch.
    ///
    /// Once the reported metrics have been sent, the reporter's own metrics are sent in a separate request. Failures
    /// while sending those are logged, but neither returned nor counted as failed points.
    ///
    /// # Errors
    ///
    /// If sending the reported metrics fails, the error is passed to the configured error handler and then returned.
    pub fn report_now(&self, timestamp: Option<i64>) -> Result<SendOutcome, Error> {
        for collector in &self.config.collectors {
            collector.collect();
        }

        let timestamp = timestamp.unwrap_or_else(unix_timestamp);
        let points = self.collect_points(self.source.as_ref(), timestamp);
        self.telemetry.track_attempt(points.len());

        if points.is_empty() {
            debug!("No metrics to report.");
            return Ok(SendOutcome::default());
        }

        let start = Instant::now();
        let result = self.client.send(&points);
        self.telemetry.track_result(points.len(), &result, start.elapsed());

        let meta_points = self.collect_points(self.telemetry.state(), timestamp);
        if let Err(e) = self.client.send(&meta_points) {
            warn!(error = %e, points = meta_points.len(), "Failed to send reporter metrics.");
        }

        match result {
            Ok(outcome) => {
                debug!(points = points.len(), "Reported metrics.");
                Ok(outcome)
            }
            Err(e) => {
                if let Some(handler) = &self.config.error_handler {
                    handler(&e);
                }
                error!(error = %e, points = points.len(), "Failed to report metrics.");
                Err(e)
            }
        }
    }

    /// Converts every metric of the source into datapoints.
    fn collect_points(&self, source: &dyn MetricsSource, timestamp: i64) -> Vec<DataPoint> {
        let mut points = Vec::new();

        for DumpedMetric { key, values } in source.dump() {
            let Some((name, tags)) = self.resolve(&key) else {
                continue;
            };

            for (sub_metric, value) in values {
                let metric = format!("{}{}.{}", self.config.prefix, name, sub_metric);
                match DataPoint::new(metric, tags.clone(), timestamp, value) {
                    Ok(point) => points.push(point),
                    Err(e) => warn!(error = %e, metric_name = key.name(), %sub_metric, "Skipping metric."),
                }
            }
        }

        points
    }

    /// Returns the name and tags of a metric, decoding tags folded into the key name.
    fn resolve(&self, key: &Key) -> Option<(String, Tags)> {
        let (name, mut tags) = if key.name().contains('{') {
            match self.decode_cache.decode(key.name()) {
                Ok(decoded) => (*decoded).clone(),
                Err(e) => {
                    warn!(error = %e, metric_name = key.name(), "Skipping metric with an undecodable name.");
                    return None;
                }
            }
        } else {
            (key.name().to_owned(), Tags::new())
        };

        for label in key.labels() {
            tags.insert(label.key().to_owned(), label.value().to_owned());
        }

        Some((name, tags))
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use apptuit::encode_metric;
    use metrics::Label;

    use super::*;

    struct StaticSource(Vec<DumpedMetric>);

    impl MetricsSource for StaticSource {
        fn dump(&self) -> Vec<DumpedMetric> {
            self.0.clone()
        }
    }

    struct NoTransport;

    impl apptuit::Transport for NoTransport {
        fn execute(
            &self,
            _: hyper::Request<hyper::body::Bytes>,
            _: Duration,
        ) -> Result<hyper::Response<hyper::body::Bytes>, apptuit::TransportError> {
            Err(apptuit::TransportError::Connection("unreachable".to_owned()))
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn reporter(prefix: &str, metrics: Vec<DumpedMetric>) -> Reporter {
        let client = Apptuit::builder()
            .with_token("token")
            .ignore_environment_tags(true)
            .with_transport(Arc::new(NoTransport))
            .build()
            .unwrap();
        let config = ReporterConfiguration {
            interval: Duration::from_secs(10),
            prefix: prefix.to_owned(),
            collectors: Vec::new(),
            error_handler: None,
        };
        Reporter::new(client, Arc::new(StaticSource(metrics)), config)
    }

    #[test]
    fn points_are_named_after_sub_metrics() {
        let metrics = vec![
            DumpedMetric::new(Key::from_name("requests"), [("count", 3.0)]),
            DumpedMetric::new(Key::from_name("latency"), [("count", 2.0), ("avg", 0.5)]),
        ];
        let reporter = reporter("app.", metrics);

        let mut names: Vec<String> = reporter
            .collect_points(reporter.source.as_ref(), 1000)
            .iter()
            .map(|p| p.metric().to_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["app.latency.avg", "app.latency.count", "app.requests.count"]);
    }

    #[test]
    fn encoded_names_are_decoded_and_labels_win() {
        let encoded = encode_metric("node.cpu", &tags(&[("host", "encoded"), ("core", "0")])).unwrap();
        let key = Key::from_parts(encoded, vec![Label::new("host", "label"), Label::new("dc", "west")]);
        let reporter = reporter("", vec![DumpedMetric::new(key, [("value", 0.75)])]);

        let points = reporter.collect_points(reporter.source.as_ref(), 1000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric(), "node.cpu.value");
        assert_eq!(points[0].tags(), &tags(&[("core", "0"), ("dc", "west"), ("host", "label")]));
        assert_eq!(points[0].timestamp(), 1000);
        assert_eq!(reporter.decode_cache.len(), 1);
    }

    #[test]
    fn bad_metrics_are_skipped() {
        let metrics = vec![
            DumpedMetric::new(Key::from_name("broken{not json"), [("count", 1.0)]),
            DumpedMetric::new(Key::from_name("gauge"), [("value", f64::NAN)]),
            DumpedMetric::new(Key::from_name("fine"), [("count", 1.0)]),
        ];
        let reporter = reporter("", metrics);

        let points = reporter.collect_points(reporter.source.as_ref(), 1000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric(), "fine.count");
    }

    #[test]
    fn failures_reach_the_error_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = reporter("", vec![DumpedMetric::new(Key::from_name("m"), [("count", 1.0)])]);
        let handler_seen = Arc::clone(&seen);
        reporter.config.error_handler = Some(Arc::new(move |e: &Error| {
            handler_seen.lock().unwrap().push(e.to_string());
        }));

        // The point has no tags and there are no global tags to fall back on.
        assert!(matches!(reporter.report_now(Some(1000)), Err(Error::MissingTags { .. })));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn nothing_to_report() {
        let reporter = reporter("", Vec::new());
        assert_eq!(reporter.report_now(None).unwrap(), SendOutcome::default());
    }
}
