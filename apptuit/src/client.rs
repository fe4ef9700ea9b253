use std::{sync::Arc, time::Duration};

use flate2::{write::ZlibEncoder, Compression};
use hyper::{
    body::Bytes,
    header::{HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT},
    Method, Request, Response, StatusCode,
};
use tracing::{debug, error, warn};

use crate::{
    config::{resolve_global_tags, resolve_token, Environment, ProcessEnvironment},
    error::PutDetails,
    payload::{PayloadBuilder, PayloadRow},
    query::{parse_response, query_url},
    sanitize::{SanitizeMode, Sanitizer},
    DataPoint, Error, QueryResult, RetryPolicy, SendOutcome, Tags, TimeSeries, Transport,
};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.apptuit.ai";
/// Maximum number of points sent in a single request.
pub const BATCH_SIZE: usize = 50_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifies the client, the major version of the `hyper` dependency, and the minimum supported Rust version the
/// crate was built against.
const USER_AGENT_VALUE: &str = concat!(
    "apptuit-rs-",
    env!("CARGO_PKG_VERSION"),
    ", hyper-1, rust-msrv-",
    env!("CARGO_PKG_RUST_VERSION")
);

/// Builder for an [`Apptuit`] client.
pub struct ApptuitBuilder {
    token: Option<String>,
    endpoint: String,
    global_tags: Option<Tags>,
    ignore_environment_tags: bool,
    sanitize_mode: SanitizeMode,
    timeout: Duration,
    retry_policy: RetryPolicy,
    batch_size: usize,
    transport: Option<Arc<dyn Transport>>,
}

impl ApptuitBuilder {
    /// Set the API token.
    ///
    /// When not set, the token is read from the `APPTUIT_API_TOKEN` environment variable at build time.
    #[must_use]
    pub fn with_token<T: Into<String>>(mut self, token: T) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the API endpoint, including the scheme and optionally the port.
    ///
    /// Defaults to `https://api.apptuit.ai`.
    #[must_use]
    pub fn with_endpoint<E: Into<String>>(mut self, endpoint: E) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set tags added to every point sent by the client.
    ///
    /// Tags of the point itself take precedence over global tags with the same key. When not set, global tags are read
    /// from the `APPTUIT_TAGS` environment variable at build time.
    #[must_use]
    pub fn with_global_tags(mut self, tags: Tags) -> Self {
        self.global_tags = Some(tags);
        self
    }

    /// Sets whether the `APPTUIT_TAGS` environment variable is ignored.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn ignore_environment_tags(mut self, ignore: bool) -> Self {
        self.ignore_environment_tags = ignore;
        self
    }

    /// Set how metric names and tag keys with disallowed characters are handled.
    ///
    /// Defaults to [`SanitizeMode::Apptuit`].
    #[must_use]
    pub fn with_sanitize_mode(mut self, mode: SanitizeMode) -> Self {
        self.sanitize_mode = mode;
        self
    }

    /// Set the per-request timeout.
    ///
    /// The timeout bounds each individual request; it does not span retries.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy for transport failures and server errors.
    ///
    /// Defaults to never retrying.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the maximum number of points per request.
    ///
    /// Defaults to [`BATCH_SIZE`].
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the transport used to reach the API.
    ///
    /// Defaults to a [`HyperTransport`](crate::HyperTransport) when the `hyper-transport` feature is enabled.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client, reading unset values from the process environment.
    ///
    /// # Errors
    ///
    /// If the token is missing, the endpoint is invalid, the environment holds malformed tags, or no transport is
    /// available, an error variant will be returned.
    pub fn build(self) -> Result<Apptuit, Error> {
        self.build_with_environment(&ProcessEnvironment)
    }

    /// Builds the client, reading unset values from the given environment.
    ///
    /// # Errors
    ///
    /// See [`ApptuitBuilder::build`].
    pub fn build_with_environment(self, env: &dyn Environment) -> Result<Apptuit, Error> {
        let token = resolve_token(self.token, env)?;

        let endpoint = self.endpoint.trim().trim_end_matches('/').to_owned();
        if endpoint.is_empty() {
            return Err(Error::invalid_config("API endpoint cannot be empty"));
        }
        url::Url::parse(&endpoint)
            .map_err(|e| Error::invalid_config(format!("invalid API endpoint {endpoint:?}: {e}")))?;

        if self.batch_size == 0 {
            return Err(Error::invalid_config("batch size must be greater than zero"));
        }

        let global_tags = if self.ignore_environment_tags {
            self.global_tags.unwrap_or_default()
        } else {
            resolve_global_tags(self.global_tags, env)?
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        Ok(Apptuit {
            token,
            endpoint,
            global_tags,
            sanitizer: Sanitizer::new(self.sanitize_mode),
            timeout: self.timeout,
            retry_policy: self.retry_policy,
            batch_size: self.batch_size,
            transport,
        })
    }
}

impl Default for ApptuitBuilder {
    fn default() -> Self {
        ApptuitBuilder {
            token: None,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            global_tags: None,
            ignore_environment_tags: false,
            sanitize_mode: SanitizeMode::default(),
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            batch_size: BATCH_SIZE,
            transport: None,
        }
    }
}

#[cfg(feature = "hyper-transport")]
fn default_transport() -> Result<Arc<dyn Transport>, Error> {
    Ok(Arc::new(crate::HyperTransport::new()?))
}

#[cfg(not(feature = "hyper-transport"))]
fn default_transport() -> Result<Arc<dyn Transport>, Error> {
    Err(Error::invalid_config("no transport configured and the `hyper-transport` feature is disabled"))
}

/// Client for the Apptuit API.
///
/// All operations block the calling thread. Batches of a single send are issued one after another, never
/// concurrently.
pub struct Apptuit {
    token: String,
    endpoint: String,
    global_tags: Tags,
    sanitizer: Sanitizer,
    timeout: Duration,
    retry_policy: RetryPolicy,
    batch_size: usize,
    transport: Arc<dyn Transport>,
}

impl Apptuit {
    /// Creates a builder for a client.
    pub fn builder() -> ApptuitBuilder {
        ApptuitBuilder::default()
    }

    /// Returns the resolved global tags.
    pub fn global_tags(&self) -> &Tags {
        &self.global_tags
    }

    /// Returns the API endpoint, without any trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends datapoints.
    ///
    /// All points are validated and converted up front; if any of them is invalid, nothing is sent. Points are then
    /// sent in batches of at most [`BATCH_SIZE`].
    ///
    /// # Errors
    ///
    /// If a point is invalid, a request fails, or the backend rejects any point, an error variant will be returned.
    /// When the backend rejected some points, or whole batches for being too large, [`Error::PartialFailure`] carries
    /// the totals of every batch. A rejected token, or a batch still failing once retries are spent, stops the send;
    /// if earlier batches were already answered, the error is wrapped in [`Error::SendAborted`] along with their
    /// totals.
    pub fn send(&self, points: &[DataPoint]) -> Result<SendOutcome, Error> {
        let rows = PayloadBuilder::new(&self.global_tags, &self.sanitizer).build_points(points)?;
        self.deliver(&rows)
    }

    /// Sends every point of the given series.
    ///
    /// # Errors
    ///
    /// See [`Apptuit::send`].
    pub fn send_timeseries(&self, series: &[TimeSeries]) -> Result<SendOutcome, Error> {
        let rows = PayloadBuilder::new(&self.global_tags, &self.sanitizer).build_series(series)?;
        self.deliver(&rows)
    }

    /// Runs a query over `[start, end)`, in seconds since the Unix epoch.
    ///
    /// Returns `Ok(None)` when the query produced no outputs.
    ///
    /// # Errors
    ///
    /// If the request fails or the response cannot be parsed, an error variant will be returned.
    pub fn query(&self, query: &str, start: i64, end: Option<i64>) -> Result<Option<QueryResult>, Error> {
        let url = query_url(&self.endpoint, query, start, end)?;

        let body = self.retry_policy.run(|| {
            let request = Request::builder()
                .method(Method::GET)
                .uri(url.as_str())
                .header(AUTHORIZATION, self.bearer()?)
                .header(USER_AGENT, USER_AGENT_VALUE)
                .body(Bytes::new())
                .map_err(|e| Error::invalid_config(format!("failed to build query request: {e}")))?;

            let response = self.transport.execute(request, self.timeout)?;
            match response.status() {
                status if status.is_success() => Ok(response.into_body()),
                StatusCode::UNAUTHORIZED => Err(Error::Credential),
                status => Err(rejection(status, &response)),
            }
        })?;

        parse_response(&body, start, end)
    }

    fn deliver(&self, rows: &[PayloadRow]) -> Result<SendOutcome, Error> {
        let mut outcome = SendOutcome::default();
        let batches = (rows.len() + self.batch_size - 1) / self.batch_size;
        debug!(points = rows.len(), batches, "Sending points.");

        for (idx, batch) in rows.chunks(self.batch_size).enumerate() {
            if let Err(e) = self.send_batch(batch, &mut outcome) {
                error!(error = %e, batch = idx, points = batch.len(), "Failed to send batch, aborting send.");
                return Err(if idx == 0 { e } else { Error::SendAborted { outcome, source: Box::new(e) } });
            }
        }

        if outcome.any_failures() {
            Err(Error::PartialFailure(outcome))
        } else {
            Ok(outcome)
        }
    }

    fn send_batch(&self, batch: &[PayloadRow], outcome: &mut SendOutcome) -> Result<(), Error> {
        let body = compress(batch)?;
        let url = format!("{}/api/put?details", self.endpoint);

        let answer = self.retry_policy.run(|| {
            let request = Request::builder()
                .method(Method::POST)
                .uri(url.as_str())
                .header(AUTHORIZATION, self.bearer()?)
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "deflate")
                .header(USER_AGENT, USER_AGENT_VALUE)
                .body(body.clone())
                .map_err(|e| Error::invalid_config(format!("failed to build put request: {e}")))?;

            let response = self.transport.execute(request, self.timeout)?;
            classify_put(&response, batch.len(), body.len())
        })?;

        match answer {
            BatchAnswer::Accepted => outcome.track_accepted(batch.len()),
            BatchAnswer::Details(status, details) => outcome.track_details(status, batch.len(), details),
            BatchAnswer::Rejected(status, reason) => {
                warn!(status, points = batch.len(), %reason, "Batch rejected.");
                outcome.track_rejected(status, batch.len(), reason);
            }
        }
        Ok(())
    }

    fn bearer(&self) -> Result<HeaderValue, Error> {
        let mut header = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| Error::invalid_config("token contains characters not allowed in a header"))?;
        header.set_sensitive(true);
        Ok(header)
    }
}

fn compress(batch: &[PayloadRow]) -> Result<Bytes, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, batch)
        .map_err(|e| Error::InvalidArgument(format!("failed to encode payload: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::InvalidArgument(format!("failed to compress payload: {e}")))?;
    Ok(Bytes::from(compressed))
}

/// How the backend answered a single batch.
enum BatchAnswer {
    /// Every point was accepted.
    Accepted,
    /// The backend reported per-point validation failures.
    Details(u16, PutDetails),
    /// The whole batch was rejected, for the given reason.
    Rejected(u16, String),
}

/// Classifies the response to a put request.
///
/// Statuses that doom only this batch are answers; statuses that doom the whole send are errors.
fn classify_put(response: &Response<Bytes>, points: usize, bytes: usize) -> Result<BatchAnswer, Error> {
    let status = response.status();
    match status {
        status if status.is_success() => Ok(BatchAnswer::Accepted),
        StatusCode::BAD_REQUEST => Ok(match serde_json::from_slice(response.body()) {
            Ok(details) => BatchAnswer::Details(status.as_u16(), details),
            Err(_) => BatchAnswer::Rejected(status.as_u16(), String::from_utf8_lossy(response.body()).into_owned()),
        }),
        StatusCode::PAYLOAD_TOO_LARGE => {
            Ok(BatchAnswer::Rejected(status.as_u16(), Error::PayloadTooLarge { points, bytes }.to_string()))
        }
        StatusCode::UNAUTHORIZED => Err(Error::Credential),
        status => Err(rejection(status, response)),
    }
}

fn rejection(status: StatusCode, response: &Response<Bytes>) -> Error {
    Error::ServerRejection {
        status: status.as_u16(),
        body: String::from_utf8_lossy(response.body()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use flate2::read::ZlibDecoder;
    use mockall::{mock, Sequence};

    use super::*;
    use crate::TransportError;

    mock! {
        Transport {}

        impl Transport for Transport {
            fn execute(&self, request: Request<Bytes>, timeout: Duration) -> Result<Response<Bytes>, TransportError>;
        }
    }

    fn respond(status: u16, body: &str) -> Response<Bytes> {
        Response::builder().status(status).body(Bytes::from(body.to_owned())).unwrap()
    }

    fn decode_rows(request: &Request<Bytes>) -> Vec<serde_json::Value> {
        let mut json = String::new();
        ZlibDecoder::new(&request.body()[..]).read_to_string(&mut json).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn client(transport: MockTransport) -> ApptuitBuilder {
        Apptuit::builder()
            .with_token("test_token")
            .with_endpoint("http://localhost/")
            .ignore_environment_tags(true)
            .with_transport(Arc::new(transport))
    }

    fn points(n: usize) -> Vec<DataPoint> {
        (0..n)
            .map(|i| DataPoint::new(format!("metric{i}"), tags(&[("tk", "tv")]), 1000, i as f64).unwrap())
            .collect()
    }

    #[test]
    fn put_request_shape() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|request, timeout| {
                let headers = request.headers();
                request.method() == Method::POST
                    && request.uri() == "http://localhost/api/put?details"
                    && headers[AUTHORIZATION] == "Bearer test_token"
                    && headers[CONTENT_TYPE] == "application/json"
                    && headers[CONTENT_ENCODING] == "deflate"
                    && headers[USER_AGENT]
                        == format!(
                            "apptuit-rs-{}, hyper-1, rust-msrv-{}",
                            env!("CARGO_PKG_VERSION"),
                            env!("CARGO_PKG_RUST_VERSION")
                        )
                        .as_str()
                    && *timeout == DEFAULT_TIMEOUT
            })
            .times(1)
            .returning(|request, _| {
                let rows = decode_rows(&request);
                assert_eq!(
                    rows,
                    vec![serde_json::json!({
                        "metric": "node.load",
                        "timestamp": 1000,
                        "value": 2.5,
                        "tags": {"host": "local", "region": "us-east-1"},
                    })]
                );
                Ok(respond(204, ""))
            });

        let client = client(transport)
            .with_global_tags(tags(&[("host", "global"), ("region", "us-east-1")]))
            .build()
            .unwrap();
        let dp = DataPoint::new("node.load", tags(&[("host", "local")]), 1000, " 2.5 ").unwrap();

        let outcome = client.send(&[dp]).unwrap();
        assert_eq!(outcome.successful, 1);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn points_are_split_into_batches() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        for expected in [4, 4, 2] {
            transport
                .expect_execute()
                .withf(move |request, _| decode_rows(request).len() == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(respond(200, "")));
        }

        let client = client(transport).with_batch_size(4).build().unwrap();
        let outcome = client.send(&points(10)).unwrap();
        assert_eq!(outcome.successful, 10);
    }

    #[test]
    fn partial_failures_are_aggregated_across_batches() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(respond(400, r#"{"success": 98, "failed": 2, "errors": [{"datapoint": "m1", "error": "bad"}, {"datapoint": "m2", "error": "worse"}]}"#)));
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(respond(204, "")));

        let client = client(transport).with_batch_size(100).build().unwrap();
        match client.send(&points(150)) {
            Err(Error::PartialFailure(outcome)) => {
                assert_eq!(outcome.successful, 148);
                assert_eq!(outcome.failed, 2);
                assert_eq!(outcome.status, Some(400));
                assert_eq!(outcome.errors.len(), 2);
                assert_eq!(outcome.errors[1].error, "worse");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn single_batch_partial_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(respond(400, r#"{"success": 98, "failed": 2, "errors": []}"#)));

        let client = client(transport).build().unwrap();
        match client.send(&points(100)) {
            Err(Error::PartialFailure(outcome)) => {
                assert_eq!(outcome.successful, 98);
                assert_eq!(outcome.failed, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unparseable_validation_failure_fails_whole_batch() {
        let mut transport = MockTransport::new();
        transport.expect_execute().times(1).returning(|_, _| Ok(respond(400, "garbage")));

        let client = client(transport).build().unwrap();
        match client.send(&points(3)) {
            Err(Error::PartialFailure(outcome)) => {
                assert_eq!(outcome.failed, 3);
                assert_eq!(outcome.errors[0].error, "garbage");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn validation_failure_without_counts_fails_whole_batch() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(respond(400, r#"{"message": "invalid payload"}"#)));

        let client = client(transport).build().unwrap();
        match client.send(&points(5)) {
            Err(Error::PartialFailure(outcome)) => {
                assert_eq!(outcome.successful, 0);
                assert_eq!(outcome.failed, 5);
                assert_eq!(outcome.status, Some(400));
                assert_eq!(outcome.errors[0].error, r#"{"message": "invalid payload"}"#);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn fatal_statuses_are_not_retried() {
        let cases: [(u16, fn(&Error) -> bool); 2] = [
            (401, |e| matches!(e, Error::Credential)),
            (413, |e| matches!(e, Error::PartialFailure(SendOutcome { status: Some(413), successful: 0, failed: 5, .. }))),
        ];

        for (status, check) in cases {
            let mut transport = MockTransport::new();
            transport.expect_execute().times(1).returning(move |_, _| Ok(respond(status, "")));

            let client = client(transport)
                .with_retry_policy(RetryPolicy::new(3).with_backoff(Duration::ZERO, Duration::ZERO))
                .build()
                .unwrap();
            let err = client.send(&points(5)).unwrap_err();
            assert!(check(&err), "{status}: {err:?}");
        }
    }

    #[test]
    fn oversized_batch_does_not_stop_later_batches() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        for status in [204, 413, 204] {
            transport
                .expect_execute()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(respond(status, "")));
        }

        let client = client(transport).with_batch_size(2).build().unwrap();
        match client.send(&points(6)) {
            Err(Error::PartialFailure(outcome)) => {
                assert_eq!(outcome.successful, 4);
                assert_eq!(outcome.failed, 2);
                assert_eq!(outcome.status, Some(413));
                assert_eq!(outcome.errors.len(), 1);
                assert!(outcome.errors[0].error.contains("too large"), "{}", outcome.errors[0].error);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn aborted_send_keeps_earlier_batches() {
        let cases: [(u16, fn(&Error) -> bool); 2] = [
            (401, |e| matches!(e, Error::Credential)),
            (503, |e| matches!(e, Error::ServerRejection { status: 503, .. })),
        ];

        for (status, check) in cases {
            let mut transport = MockTransport::new();
            let mut seq = Sequence::new();
            transport
                .expect_execute()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(respond(204, "")));
            transport
                .expect_execute()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(respond(status, "")));

            let client = client(transport).with_batch_size(2).build().unwrap();
            match client.send(&points(6)) {
                Err(Error::SendAborted { outcome, source }) => {
                    assert_eq!(outcome.successful, 2, "{status}");
                    assert_eq!(outcome.failed, 0, "{status}");
                    assert!(check(&source), "{status}: {source:?}");
                }
                other => panic!("{status}: unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn server_errors_are_retried() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(respond(503, "unavailable")));
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(TransportError::Connection("reset".to_owned())));
        transport
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(respond(204, "")));

        let client = client(transport)
            .with_retry_policy(RetryPolicy::new(2).with_backoff(Duration::ZERO, Duration::ZERO))
            .build()
            .unwrap();
        assert_eq!(client.send(&points(1)).unwrap().successful, 1);
    }

    #[test]
    fn exhausted_retries_surface_last_error() {
        let mut transport = MockTransport::new();
        transport.expect_execute().times(2).returning(|_, _| Ok(respond(500, "boom")));

        let client = client(transport)
            .with_retry_policy(RetryPolicy::new(1).with_backoff(Duration::ZERO, Duration::ZERO))
            .build()
            .unwrap();
        match client.send(&points(1)) {
            Err(Error::ServerRejection { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_points_never_reach_the_network() {
        let mut transport = MockTransport::new();
        transport.expect_execute().never();

        let client = client(transport).with_sanitize_mode(SanitizeMode::Strict).build().unwrap();
        let mut dps = points(2);
        dps.push(DataPoint::new("bad metric", tags(&[("tk", "tv")]), 1, 1).unwrap());
        assert!(matches!(client.send(&dps), Err(Error::InvalidIdentifier { .. })));

        let untagged = DataPoint::new("m", Tags::new(), 1, 1).unwrap();
        assert!(matches!(client.send(&[untagged]), Err(Error::MissingTags { .. })));
    }

    #[test]
    fn timeseries_are_sent_point_by_point() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|request, _| decode_rows(request).len() == 5)
            .times(1)
            .returning(|_, _| Ok(respond(204, "")));

        let client = client(transport).build().unwrap();
        let mut first = TimeSeries::new("a", tags(&[("x", "1")])).unwrap();
        for ts in 0..3 {
            first.add_point(ts, ts).unwrap();
        }
        let second = TimeSeries::from_points("b", tags(&[("x", "2")]), vec![1, 2], vec![1.0, 2.0]).unwrap();

        assert_eq!(client.send_timeseries(&[first, second]).unwrap().successful, 5);
    }

    #[test]
    fn configuration_errors() {
        let env = |_: &str| None;

        let missing_token = Apptuit::builder().with_transport(Arc::new(MockTransport::new()));
        assert!(matches!(
            missing_token.build_with_environment(&env),
            Err(Error::InvalidConfiguration(_))
        ));

        let empty_endpoint = client(MockTransport::new()).with_endpoint("  ");
        assert!(matches!(empty_endpoint.build_with_environment(&env), Err(Error::InvalidConfiguration(_))));

        let bad_endpoint = client(MockTransport::new()).with_endpoint("not a url");
        assert!(matches!(bad_endpoint.build_with_environment(&env), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn environment_tags_are_used_unless_ignored() {
        let env = |key: &str| (key == crate::config::TAGS_ENV).then(|| "tagk1: 22, tagk2: tagv2".to_owned());

        let client = Apptuit::builder()
            .with_token("t")
            .with_transport(Arc::new(MockTransport::new()))
            .build_with_environment(&env)
            .unwrap();
        assert_eq!(client.global_tags(), &tags(&[("tagk1", "22"), ("tagk2", "tagv2")]));

        let client = Apptuit::builder()
            .with_token("t")
            .ignore_environment_tags(true)
            .with_transport(Arc::new(MockTransport::new()))
            .build_with_environment(&env)
            .unwrap();
        assert!(client.global_tags().is_empty());
    }

    #[test]
    fn query_request_and_response() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .withf(|request, _| {
                request.method() == Method::GET
                    && request.uri().path() == "/api/query"
                    && request.uri().query() == Some("start=100&end=200&q=fetch%28%27cpu%27%29")
                    && request.headers()[AUTHORIZATION] == "Bearer test_token"
            })
            .times(1)
            .returning(|_, _| {
                Ok(respond(
                    200,
                    r#"{"outputs": [{"id": "cpu", "result": [{"metric": "cpu", "tags": {"h": "a"}, "dps": [[100, 1.0], [200, 2.0]]}]}]}"#,
                ))
            });

        let client = client(transport).build().unwrap();
        let result = client.query("fetch('cpu')", 100, Some(200)).unwrap().unwrap();
        assert_eq!(result.output("cpu").unwrap().series()[0].timestamps(), &[100]);
    }

    #[test]
    fn query_with_no_outputs() {
        let mut transport = MockTransport::new();
        transport.expect_execute().times(1).returning(|_, _| Ok(respond(200, r#"{"outputs": []}"#)));

        let client = client(transport).build().unwrap();
        assert!(client.query("q", 0, None).unwrap().is_none());
    }

    #[test]
    fn query_retries_then_fails() {
        let mut transport = MockTransport::new();
        transport
            .expect_execute()
            .times(4)
            .returning(|_, _| Err(TransportError::Timeout(Duration::from_secs(1))));

        let client = client(transport)
            .with_retry_policy(RetryPolicy::new(3).with_backoff(Duration::ZERO, Duration::ZERO))
            .build()
            .unwrap();
        assert!(matches!(client.query("q", 0, None), Err(Error::Transport(TransportError::Timeout(_)))));
    }
}
