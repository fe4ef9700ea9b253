use std::{sync::Arc, time::Duration};

use apptuit::{Error, SendOutcome};
use metrics::{Counter, Histogram, Key};

use crate::state::State;

/// Total number of points the reporter attempted to send.
pub const SEND_TOTAL: &str = "apptuit.reporter.send.total";
/// Number of points accepted by the backend.
pub const SEND_SUCCESSFUL: &str = "apptuit.reporter.send.successful";
/// Number of points that could not be delivered.
pub const SEND_FAILED: &str = "apptuit.reporter.send.failed";
/// Time taken by each send, in seconds.
pub const SEND_TIME: &str = "apptuit.reporter.send.time";

/// Reporter telemetry.
///
/// `Telemetry` tracks the reporter's own delivery statistics. They are kept in a registry of their own, apart from the
/// reported metrics, and sent after each cycle in a separate request.
pub(crate) struct Telemetry {
    state: Arc<State>,
    total: Counter,
    successful: Counter,
    failed: Counter,
    send_time: Histogram,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        let state = Arc::new(State::new());

        let counter = |name: &'static str| state.counter(&Key::from_static_name(name));
        let total = counter(SEND_TOTAL);
        let successful = counter(SEND_SUCCESSFUL);
        let failed = counter(SEND_FAILED);
        let send_time = state.histogram(&Key::from_static_name(SEND_TIME));

        Self { state, total, successful, failed, send_time }
    }

    /// Returns the registry holding the telemetry metrics.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Tracks the number of points about to be sent.
    pub fn track_attempt(&self, points: usize) {
        self.total.increment(points as u64);
    }

    /// Tracks the result of sending `points` points.
    pub fn track_result(&self, points: usize, result: &Result<SendOutcome, Error>, elapsed: Duration) {
        self.send_time.record(elapsed);

        match result {
            Ok(outcome) => {
                self.successful.increment(outcome.successful);
                self.failed.increment(0);
            }
            Err(Error::PartialFailure(outcome)) => {
                self.successful.increment(outcome.successful);
                self.failed.increment(outcome.failed);
            }
            // Everything not accepted before the send stopped was never delivered.
            Err(Error::SendAborted { outcome, .. }) => {
                self.successful.increment(outcome.successful);
                self.failed.increment((points as u64).saturating_sub(outcome.successful));
            }
            Err(_) => self.failed.increment(points as u64),
        }
    }
}
