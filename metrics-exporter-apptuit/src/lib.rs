//! A [`metrics`]-compatible exporter for periodically reporting metrics to [Apptuit][apptuit].
//!
//! [apptuit]: https://apptuit.ai
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_exporter_apptuit::ApptuitExporterBuilder;
//! # use std::time::Duration;
//! // The token is read from `APPTUIT_API_TOKEN` unless given explicitly.
//! let builder = ApptuitExporterBuilder::default()
//!     .with_token("my-token")
//!     .with_prefix("myapp.")
//!     .with_reporting_interval(Duration::from_secs(15));
//!
//! // Installing sets the recorder as the global recorder for all `metrics` calls, and spawns a background thread
//! // reporting to Apptuit. Reporting stops when the handle is dropped.
//! let handle = builder.install().expect("failed to install recorder/exporter");
//!
//! metrics::counter!("requests", "path" => "/").increment(1);
//!
//! // Metrics can also be reported out of band, for example right before the application exits.
//! if let Err(e) = handle.reporter().report_now(None) {
//!     eprintln!("failed to report metrics: {e}");
//! }
//! ```
//!
//! # Reported values
//!
//! Every metric is reported as one datapoint per sub-metric, named `<prefix><name>.<sub-metric>`:
//!
//! - counters report `count`, the total since the counter was registered
//! - gauges report `value`, the last value set
//! - histograms report `count`, the total number of recorded values, and the `sum`, `min`, `max`, `avg`, `std_dev`
//!   and the 50th, 75th, 95th, 99th and 99.9th percentiles (`50_percentile` ... `999_percentile`) of the values
//!   recorded since the previous cycle
//!
//! Labels become tags. Metric names may also carry tags in the `name{"key": "value"}` form produced by
//! [`apptuit::encode_metric`], which are decoded before reporting.
//!
//! # Global tags
//!
//! Tags read from the `APPTUIT_TAGS` environment variable, tags given to the builder, and a `host` tag holding the
//! hostname are added to every reported metric. The `host` tag can be turned off with
//! [`ApptuitExporterBuilder::with_host_tag`] or by setting `APPTUIT_DISABLE_HOST_TAG=true`.
//!
//! # Telemetry
//!
//! The reporter tracks the number of points it attempted to send, the number accepted and rejected, and the time
//! taken by each send, as `apptuit.reporter.send.total`, `apptuit.reporter.send.successful`,
//! `apptuit.reporter.send.failed` and `apptuit.reporter.send.time`. These are kept apart from the reported metrics and
//! sent in a separate request after each cycle.
//!
//! # Other registries
//!
//! Any registry implementing [`MetricsSource`] can be reported with [`ApptuitExporterBuilder::build_reporter`] or
//! [`ApptuitExporterBuilder::spawn_reporter`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{ApptuitExporterBuilder, BuildError};

mod forwarder;
pub use self::forwarder::ReporterHandle;

mod recorder;
pub use self::recorder::ApptuitRecorder;

mod reporter;
pub use self::reporter::Reporter;

mod source;
pub use self::source::{Collector, DumpedMetric, MetricsSource};

mod state;
mod storage;

mod telemetry;
pub use self::telemetry::{SEND_FAILED, SEND_SUCCESSFUL, SEND_TIME, SEND_TOTAL};
