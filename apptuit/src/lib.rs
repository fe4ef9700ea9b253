//! A client for the [Apptuit][apptuit] time series API.
//!
//! [apptuit]: https://apptuit.ai
//!
//! # Usage
//!
//! ```no_run
//! # use apptuit::{Apptuit, DataPoint, Tags};
//! // The token is read from `APPTUIT_API_TOKEN` unless given explicitly, and global tags are read from
//! // `APPTUIT_TAGS` unless given explicitly.
//! let client = Apptuit::builder()
//!     .with_token("my-token")
//!     .build()
//!     .expect("failed to build client");
//!
//! let tags: Tags = [("host".to_owned(), "web-1".to_owned())].into_iter().collect();
//! let point = DataPoint::new("node.load1", tags, 1_700_000_000, 0.42).expect("invalid point");
//!
//! match client.send(&[point]) {
//!     Ok(outcome) => println!("{} points accepted", outcome.successful),
//!     Err(e) => eprintln!("send failed: {e}"),
//! }
//!
//! // Query the last hour of data.
//! if let Some(result) = client.query("fetch('node.load1')", 1_700_000_000 - 3600, None).expect("query failed") {
//!     for (id, output) in result.outputs() {
//!         println!("{id}: {} series", output.series().len());
//!     }
//! }
//! ```
//!
//! # Metric identity
//!
//! A metric is identified by its name and its tags. [`encode_metric`] folds both into a single string, of the form
//! `name{"k1": "v1", "k2": "v2"}`, which can be used as a key in registries that only know about names.
//! [`decode_metric`] reverses it, and [`DecodeCache`] memoizes decoding for hot paths.
//!
//! # Sending
//!
//! Points are validated and sanitized according to the client's [`SanitizeMode`], merged with the global tags, and
//! sent in deflate-compressed batches of at most [`BATCH_SIZE`] points. When the backend rejects some of the points,
//! the send returns [`Error::PartialFailure`] carrying the aggregated [`SendOutcome`] of every batch.
//!
//! # Features
//!
//! - `hyper-transport` (default): provides [`HyperTransport`], a blocking transport backed by `hyper` and `rustls`.
//!   Without it, a [`Transport`] must be supplied to the builder.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod client;
pub use self::client::{Apptuit, ApptuitBuilder, BATCH_SIZE, DEFAULT_ENDPOINT};

pub mod config;

mod error;
pub use self::error::{Error, PointError, SendOutcome, TransportError};

mod identity;
pub use self::identity::{decode_metric, encode_metric, DecodeCache, MetricId, Tags, DEFAULT_DECODE_CACHE_SIZE};

mod payload;
pub use self::payload::{merge_tags, PayloadRow, MAX_TAGS_LIMIT};

mod point;
pub use self::point::{DataPoint, TimeSeries, ToValue};

mod query;
pub use self::query::{Output, QueryResult};

mod retry;
pub use self::retry::RetryPolicy;

pub mod sanitize;
pub use self::sanitize::{SanitizeMode, Sanitizer};

mod transport;
#[cfg(feature = "hyper-transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "hyper-transport")))]
pub use self::transport::HyperTransport;
pub use self::transport::Transport;
