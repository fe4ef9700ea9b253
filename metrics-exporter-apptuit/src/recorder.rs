use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

use crate::state::State;

/// A recorder that holds metrics until they are reported to Apptuit.
///
/// Metric names may carry their tags in the encoded `name{"key": "value"}` form. Such names are stored as given and
/// decoded when reported, with the labels of the key taking precedence over the encoded tags.
///
/// Descriptions and units are not reported.
pub struct ApptuitRecorder {
    state: Arc<State>,
}

impl ApptuitRecorder {
    pub(crate) fn new(state: Arc<State>) -> Self {
        ApptuitRecorder { state }
    }
}

impl Recorder for ApptuitRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.state.counter(key)
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.state.gauge(key)
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.state.histogram(key)
    }
}
