use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http::Response;
use tower::BoxError;
use tower::Service;

use crate::PaceError;

/// Per-attempt timeout used by [`ReqwestTransport::new`].
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends buffered requests with a [`reqwest::Client`].
///
/// Each call is bounded by the attempt timeout. A timed out attempt fails
/// with a `reqwest` timeout error, which the default retry policy repeats.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, PaceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| PaceError::Client(err.to_string()))?;
        Ok(Self::from_client(client))
    }

    /// Use an existing client, for example one with custom TLS or proxies.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Service<Request<Bytes>> for ReqwestTransport {
    type Response = Response<reqwest::Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let client = self.client.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut request = reqwest::Request::try_from(req)?;
            *request.timeout_mut() = Some(timeout);
            let response = client.execute(request).await?;
            Ok(Response::from(response))
        })
    }
}
