use std::{sync::Arc, time::Duration};

use apptuit::{
    config::{host_tag_disabled, resolve_global_tags, Environment, ProcessEnvironment},
    Apptuit, ApptuitBuilder, Error, RetryPolicy, SanitizeMode, Tags, Transport,
};
use tracing::warn;

use crate::{
    forwarder::ReporterHandle,
    recorder::ApptuitRecorder,
    reporter::{ErrorHandler, Reporter, ReporterConfiguration},
    source::{Collector, MetricsSource},
    state::State,
};

const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(10);
const HOST_TAG: &str = "host";

/// Errors that could occur while building or installing an Apptuit recorder/exporter.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The exporter or its client were configured with invalid settings.
    #[error(transparent)]
    Configuration(#[from] Error),

    /// Failed to spawn the background reporter thread.
    #[error("failed to spawn background thread for the reporter")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder")]
    FailedToInstall,
}

/// Builder for an Apptuit exporter.
pub struct ApptuitExporterBuilder {
    client: ApptuitBuilder,
    reporting_interval: Duration,
    prefix: String,
    tags: Option<Tags>,
    host_tag: Option<bool>,
    collectors: Vec<Box<dyn Collector>>,
    error_handler: Option<ErrorHandler>,
}

impl ApptuitExporterBuilder {
    /// Set the API token.
    ///
    /// When not set, the token is read from the `APPTUIT_API_TOKEN` environment variable.
    #[must_use]
    pub fn with_token<T: Into<String>>(mut self, token: T) -> Self {
        self.client = self.client.with_token(token);
        self
    }

    /// Set the API endpoint.
    ///
    /// Defaults to `https://api.apptuit.ai`.
    #[must_use]
    pub fn with_endpoint<E: Into<String>>(mut self, endpoint: E) -> Self {
        self.client = self.client.with_endpoint(endpoint);
        self
    }

    /// Set the interval at which metrics are reported.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = interval;
        self
    }

    /// Set a prefix prepended to the name of every reported metric.
    ///
    /// The prefix is prepended as-is, so it should usually end with a separator, such as `myapp.`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set tags added to every reported metric.
    ///
    /// Tags from the `APPTUIT_TAGS` environment variable are still applied, with these tags taking precedence on
    /// conflicting keys. Tags of a metric itself take precedence over both.
    #[must_use]
    pub fn with_global_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Sets whether a `host` tag, holding the hostname of the machine, is added to every reported metric.
    ///
    /// The tag is never added when global tags already have a `host` key.
    ///
    /// Defaults to `true`, unless the `APPTUIT_DISABLE_HOST_TAG` environment variable is set to `true`.
    #[must_use]
    pub fn with_host_tag(mut self, enabled: bool) -> Self {
        self.host_tag = Some(enabled);
        self
    }

    /// Set how metric names and tag keys with disallowed characters are handled.
    ///
    /// Defaults to [`SanitizeMode::Apptuit`].
    #[must_use]
    pub fn with_sanitize_mode(mut self, mode: SanitizeMode) -> Self {
        self.client = self.client.with_sanitize_mode(mode);
        self
    }

    /// Set the timeout of each request to the API.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    /// Set the retry policy for failed requests.
    ///
    /// Defaults to never retrying.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(policy);
        self
    }

    /// Set the maximum number of points sent per request.
    ///
    /// Defaults to [`apptuit::BATCH_SIZE`].
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.client = self.client.with_batch_size(batch_size);
        self
    }

    /// Set the transport used to reach the API.
    ///
    /// Defaults to [`apptuit::HyperTransport`] when the `hyper-transport` feature is enabled.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.client = self.client.with_transport(transport);
        self
    }

    /// Set a callback invoked with every error of a failed reporting cycle.
    ///
    /// Errors are logged whether or not a handler is set.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Add a collector, run at the start of every reporting cycle.
    #[must_use]
    pub fn with_collector<C>(mut self, collector: C) -> Self
    where
        C: Collector + 'static,
    {
        self.collectors.push(Box::new(collector));
        self
    }

    /// Builds a reporter for the given source, without starting it.
    ///
    /// The reporter only reports when [`Reporter::report_now`] is called. This is useful for reporting metrics held by
    /// a registry other than the one built into this crate.
    ///
    /// # Errors
    ///
    /// If the token is missing, the reporting interval is zero, or any other setting is invalid, an error will be
    /// returned.
    pub fn build_reporter(self, source: Arc<dyn MetricsSource>) -> Result<Reporter, BuildError> {
        self.build_reporter_with_environment(source, &ProcessEnvironment)
    }

    fn build_reporter_with_environment(
        self,
        source: Arc<dyn MetricsSource>,
        env: &dyn Environment,
    ) -> Result<Reporter, BuildError> {
        if self.reporting_interval.is_zero() {
            return Err(Error::InvalidConfiguration("reporting interval must be greater than zero".to_owned()).into());
        }

        // Explicit tags are layered over the environment ones, rather than replacing them.
        let mut tags = resolve_global_tags(None, env)?;
        tags.extend(self.tags.unwrap_or_default());

        let host_tag = self.host_tag.unwrap_or_else(|| !host_tag_disabled(env));
        if host_tag && !tags.contains_key(HOST_TAG) {
            match hostname::get() {
                Ok(host) => {
                    tags.insert(HOST_TAG.to_owned(), host.to_string_lossy().into_owned());
                }
                Err(e) => warn!(error = %e, "Failed to get hostname, not adding a host tag."),
            }
        }

        let client: Apptuit = self
            .client
            .with_global_tags(tags)
            .ignore_environment_tags(true)
            .build_with_environment(env)?;

        let config = ReporterConfiguration {
            interval: self.reporting_interval,
            prefix: self.prefix,
            collectors: self.collectors,
            error_handler: self.error_handler,
        };

        Ok(Reporter::new(client, source, config))
    }

    /// Builds a reporter for the given source, and starts reporting in the background.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or the background thread cannot be spawned, an error will be returned.
    pub fn spawn_reporter(self, source: Arc<dyn MetricsSource>) -> Result<ReporterHandle, BuildError> {
        ReporterHandle::spawn(self.build_reporter(source)?)
    }

    /// Builds the recorder and starts reporting its metrics in the background.
    ///
    /// The recorder is not installed globally, and can be installed or wrapped by the caller. Reporting stops when
    /// the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or the background thread cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<(ApptuitRecorder, ReporterHandle), BuildError> {
        let state = Arc::new(State::new());
        let recorder = ApptuitRecorder::new(Arc::clone(&state));
        let handle = self.spawn_reporter(state)?;

        Ok((recorder, handle))
    }

    /// Builds the recorder, installs it as the global recorder, and starts reporting in the background.
    ///
    /// Reporting stops when the returned handle is dropped, so it usually needs to be held until the application
    /// exits.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, the background thread cannot be spawned, or a global recorder is already
    /// installed, an error will be returned.
    pub fn install(self) -> Result<ReporterHandle, BuildError> {
        let (recorder, handle) = self.build()?;

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;
        Ok(handle)
    }
}

impl Default for ApptuitExporterBuilder {
    fn default() -> Self {
        ApptuitExporterBuilder {
            client: Apptuit::builder(),
            reporting_interval: DEFAULT_REPORTING_INTERVAL,
            prefix: String::new(),
            tags: None,
            host_tag: None,
            collectors: Vec::new(),
            error_handler: None,
        }
    }
}
