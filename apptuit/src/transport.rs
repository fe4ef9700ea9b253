//! HTTP transport.
//!
//! All requests made by the client go through a [`Transport`], which performs a single blocking request/response
//! exchange. The default implementation drives a `hyper` client on a private current-thread `tokio` runtime, so callers
//! never need an async runtime of their own.
use std::time::Duration;

use hyper::{body::Bytes, Request, Response};

use crate::TransportError;

/// A blocking HTTP transport.
pub trait Transport: Send + Sync {
    /// Performs the request, waiting at most `timeout` for the full response.
    ///
    /// # Errors
    ///
    /// If the request cannot be sent, or no complete response arrives in time, an error variant will be returned.
    /// Non-success statuses are not errors at this level.
    fn execute(&self, request: Request<Bytes>, timeout: Duration) -> Result<Response<Bytes>, TransportError>;
}

#[cfg(feature = "hyper-transport")]
pub use self::hyper_transport::HyperTransport;

#[cfg(feature = "hyper-transport")]
mod hyper_transport {
    use std::time::Duration;

    use http_body_util::{BodyExt as _, Full};
    use hyper::{body::Bytes, Request, Response};
    use hyper_rustls::HttpsConnector;
    use hyper_util::{
        client::legacy::{connect::HttpConnector, Client},
        rt::TokioExecutor,
    };
    use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

    use super::Transport;
    use crate::TransportError;

    /// Transport backed by `hyper`, supporting both `http` and `https` endpoints.
    ///
    /// Must not be used from within an asynchronous context, as requests block the calling thread.
    pub struct HyperTransport {
        runtime: Runtime,
        client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    }

    impl HyperTransport {
        /// Creates a new `HyperTransport`.
        ///
        /// # Errors
        ///
        /// If the runtime cannot be created or no native root certificates are available, an error variant will be
        /// returned.
        pub fn new() -> Result<Self, TransportError> {
            let runtime = RuntimeBuilder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TransportError::Connection(format!("failed to create runtime: {e}")))?;

            let https = hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| TransportError::Connection(format!("no native root CA certificates found: {e}")))?
                .https_or_http()
                .enable_http1()
                .build();
            let client = Client::builder(TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(30))
                .build(https);

            Ok(Self { runtime, client })
        }
    }

    impl Transport for HyperTransport {
        fn execute(&self, request: Request<Bytes>, timeout: Duration) -> Result<Response<Bytes>, TransportError> {
            let (parts, body) = request.into_parts();
            let request = Request::from_parts(parts, Full::new(body));

            self.runtime.block_on(async {
                let exchange = async {
                    let response = self
                        .client
                        .request(request)
                        .await
                        .map_err(|e| TransportError::Connection(e.to_string()))?;
                    let (parts, body) = response.into_parts();
                    let body = body
                        .collect()
                        .await
                        .map_err(|e| TransportError::Connection(e.to_string()))?
                        .to_bytes();
                    Ok::<_, TransportError>(Response::from_parts(parts, body))
                };

                match tokio::time::timeout(timeout, exchange).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            })
        }
    }
}
