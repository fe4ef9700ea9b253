use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::{BuildError, Reporter};

/// Handle to a reporter running on a background thread.
///
/// Reporting stops when the handle is dropped, or when [`stop`](ReporterHandle::stop) is called. A cycle in progress
/// is allowed to finish first.
pub struct ReporterHandle {
    reporter: Arc<Reporter>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Spawns a thread running `reporter` on its configured interval.
    pub(crate) fn spawn(reporter: Reporter) -> Result<Self, BuildError> {
        let reporter = Arc::new(reporter);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let thread = {
            let reporter = Arc::clone(&reporter);
            thread::Builder::new()
                .name("metrics-exporter-apptuit-reporter".to_string())
                .spawn(move || run(&reporter, &shutdown_rx))
                .map_err(|_| BuildError::Backend)?
        };

        Ok(ReporterHandle { reporter, shutdown: Some(shutdown_tx), thread: Some(thread) })
    }

    /// Returns the reporter, for reporting out of band with [`Reporter::report_now`].
    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Stops the background reporter, waiting for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel, which wakes the reporter thread up.
        drop(self.shutdown.take());

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Reporter thread panicked.");
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(reporter: &Reporter, shutdown: &Receiver<()>) {
    let interval = reporter.interval();
    let mut next_report = Instant::now() + interval;

    loop {
        // Sleep until the next report is due, or until asked to shut down.
        //
        // If the previous cycle took longer than the interval, we won't sleep at all.
        match shutdown.recv_timeout(next_report.saturating_duration_since(Instant::now())) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        next_report = Instant::now() + interval;

        // A failed cycle has already been logged and passed to the error handler, and must not stop later cycles.
        match reporter.report_now(None) {
            Ok(outcome) => debug!(points = outcome.successful, "Reporting cycle finished."),
            Err(e) => debug!(error = %e, "Reporting cycle failed."),
        }
    }

    debug!("Reporter stopped.");
}
