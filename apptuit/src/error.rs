use std::{fmt, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while talking to the Apptuit API.
#[derive(Debug, Error)]
pub enum Error {
    /// The client or reporter was configured with invalid settings.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An argument passed to a codec function was unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An encoded metric key could not be decoded.
    #[error("failed to parse the encoded metric name {key:?}, invalid format")]
    Decode {
        /// The key that failed to decode.
        key: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A metric name, tag key or tag value contains characters outside of the allowed set.
    #[error("{kind} {value:?} contains an invalid character, allowed characters are unicode letters, 0-9, -, _, ., and /")]
    InvalidIdentifier {
        /// What was being validated (`metric name`, `tag key` or `tag value`).
        kind: &'static str,
        /// The offending value.
        value: String,
    },

    /// A datapoint value could not be interpreted as a finite number.
    #[error("expected a numeric value, got {0:?}")]
    InvalidValue(String),

    /// A datapoint ended up without any tags after merging in the global tags.
    #[error("metric {metric:?} needs a minimum of one tag")]
    MissingTags {
        /// Name of the metric.
        metric: String,
    },

    /// A datapoint carries more tags than the backend accepts.
    #[error("too many tags for metric {metric:?}: {count} tags, the limit is {limit}")]
    TooManyTags {
        /// Name of the metric.
        metric: String,
        /// Number of tags after merging in the global tags.
        count: usize,
        /// Maximum number of tags allowed.
        limit: usize,
    },

    /// The request could not be completed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered with an unexpected (typically 5xx) status.
    #[error("request failed with status {status}: {body}")]
    ServerRejection {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The backend rejected the token.
    #[error("invalid token: the API responded with 401 Unauthorized")]
    Credential,

    /// A batch was larger than the backend is willing to accept.
    #[error("payload of {points} points ({bytes} bytes compressed) was rejected as too large")]
    PayloadTooLarge {
        /// Number of points in the rejected batch.
        points: usize,
        /// Size of the compressed request body.
        bytes: usize,
    },

    /// Some or all points were rejected by the backend.
    #[error("{0}")]
    PartialFailure(SendOutcome),

    /// A send stopped on a fatal error after earlier batches had already been answered.
    ///
    /// `outcome` holds what the backend reported for those earlier batches; every point not counted in it was never
    /// delivered.
    #[error("send aborted after {} points were accepted: {source}", .outcome.successful)]
    SendAborted {
        /// Totals of the batches answered before the send stopped.
        outcome: SendOutcome,
        /// The error that stopped the send.
        source: Box<Error>,
    },

    /// The backend response could not be understood.
    #[error("invalid response from the API: {0}")]
    InvalidResponse(String),

    /// A query output was looked up by an id or index that is not present.
    #[error("no output named {0} in the query result")]
    OutputNotFound(String),
}

impl Error {
    /// Returns `true` if the request that produced this error may succeed when attempted again.
    ///
    /// Only transport failures and server-side (5xx) rejections are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::ServerRejection { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the totals of the batches that were answered before this error, if any were.
    pub fn outcome(&self) -> Option<&SendOutcome> {
        match self {
            Error::PartialFailure(outcome) | Error::SendAborted { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub(crate) fn invalid_config<S: Into<String>>(reason: S) -> Self {
        Error::InvalidConfiguration(reason.into())
    }
}

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection could not be established or was interrupted.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request could not be built.
    #[error("failed to build request: {0}")]
    Request(String),
}

/// A single point rejected by the backend.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PointError {
    /// The offending datapoint, as echoed back by the backend.
    #[serde(default)]
    pub datapoint: serde_json::Value,
    /// Why it was rejected.
    #[serde(default)]
    pub error: String,
}

/// Aggregated result of a send operation.
///
/// Carries the number of points accepted and rejected across every batch of the operation, along with the per-point
/// errors reported by the backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOutcome {
    /// Last non-success status observed, if any.
    pub status: Option<u16>,
    /// Number of points the backend accepted.
    pub successful: u64,
    /// Number of points the backend rejected.
    pub failed: u64,
    /// Itemized rejections.
    pub errors: Vec<PointError>,
}

impl SendOutcome {
    /// Returns `true` if any point was rejected.
    pub fn any_failures(&self) -> bool {
        self.failed > 0
    }

    pub(crate) fn track_accepted(&mut self, points: usize) {
        self.successful += points as u64;
    }

    /// Tracks the details of a rejected batch of `points` points.
    ///
    /// Points the backend accounted for neither as successful nor as failed are counted as failed.
    pub(crate) fn track_details(&mut self, status: u16, points: usize, details: PutDetails) {
        let unaccounted = (points as u64).saturating_sub(details.success.saturating_add(details.failed));

        self.status = Some(status);
        self.successful += details.success;
        self.failed += details.failed + unaccounted;
        self.errors.extend(details.errors);
    }

    /// Tracks a batch of `points` points rejected as a whole.
    pub(crate) fn track_rejected(&mut self, status: u16, points: usize, reason: String) {
        self.status = Some(status);
        self.failed += points as u64;
        self.errors.push(PointError { datapoint: serde_json::Value::Null, error: reason });
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => writeln!(f, "{} points failed with status: {}", self.failed, status)?,
            None => writeln!(f, "{} points failed", self.failed)?,
        }

        for error in &self.errors {
            let datapoint = match &error.datapoint {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writeln!(f, "{} error occurred in the datapoint {}", error.error, datapoint)?;
        }

        Ok(())
    }
}

/// Body of a `/api/put?details` response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PutDetails {
    pub success: u64,
    pub failed: u64,
    #[serde(default)]
    pub errors: Vec<PointError>,
}
