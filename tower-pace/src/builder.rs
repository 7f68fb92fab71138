use std::sync::Arc;
use std::task::Context as TaskContext;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http::Response;
use http_body::Body;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::util::BoxCloneSyncService;

use crate::Context;
use crate::Credentials;
use crate::CredentialsLayer;
use crate::PaceError;
use crate::Pacer;
use crate::ReqwestTransport;
use crate::retry::RetryConfig;
use crate::transport::DEFAULT_ATTEMPT_TIMEOUT;
use crate::utils::ServiceBuilderExt;

/// Assembles credentials, pipeline and transport into one service.
///
/// Each build creates a single [`Pacer`] unless one is supplied with
/// [`with_pacer`](Self::with_pacer); supply the same pacer to every client
/// that talks to the same server.
#[derive(Clone, Debug)]
pub struct TransportBuilder {
    credentials: Option<Credentials>,
    pacer: Option<Arc<Pacer>>,
    retry: RetryConfig,
    attempt_timeout: Duration,
    lifetime: Context,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            credentials: None,
            pacer: None,
            retry: RetryConfig::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            lifetime: Context::background(),
        }
    }
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Share an existing pacer. Its own lifetime is kept.
    pub fn with_pacer(mut self, pacer: Arc<Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Timeout for each call made by the built-in transport.
    ///
    /// Ignored by [`build_with`](Self::build_with).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Lifetime of the pacer this builder creates.
    pub fn with_lifetime(mut self, lifetime: Context) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Build on top of a `reqwest` client.
    pub fn build<B>(self) -> Result<PacedClient<B, reqwest::Body>, PaceError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let transport = ReqwestTransport::new()?.with_timeout(self.attempt_timeout);
        Ok(self.build_with(transport))
    }

    /// Build on top of a caller supplied transport.
    pub fn build_with<T, B, R>(self, transport: T) -> PacedClient<B, R>
    where
        T: Service<Request<Bytes>, Response = Response<R>, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
        R: Send + 'static,
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let pacer = self
            .pacer
            .unwrap_or_else(|| Arc::new(Pacer::new(self.lifetime)));

        let service = ServiceBuilder::new()
            .option_layer(self.credentials.map(CredentialsLayer::new))
            .paced(Arc::clone(&pacer), self.retry)
            .service(transport);

        PacedClient {
            service: BoxCloneSyncService::new(service),
            pacer,
        }
    }
}

/// A ready to use paced, retrying client.
pub struct PacedClient<B, R> {
    service: BoxCloneSyncService<Request<B>, Response<R>, BoxError>,
    pacer: Arc<Pacer>,
}

impl<B, R> Clone for PacedClient<B, R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            pacer: Arc::clone(&self.pacer),
        }
    }
}

impl<B, R> PacedClient<B, R> {
    /// The pacer every clone of this client shares.
    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    pub fn into_service(self) -> BoxCloneSyncService<Request<B>, Response<R>, BoxError> {
        self.service
    }
}

impl<B, R> Service<Request<B>> for PacedClient<B, R> {
    type Response = Response<R>;
    type Error = BoxError;
    type Future = <BoxCloneSyncService<Request<B>, Response<R>, BoxError> as Service<
        Request<B>,
    >>::Future;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        self.service.call(req)
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use http::header::AUTHORIZATION;
    use http_body_util::Full;
    use tower::ServiceExt;
    use tower::service_fn;

    use super::*;

    #[tokio::test]
    async fn it_stacks_credentials_over_the_pipeline() {
        let transport = service_fn(|req: Request<Bytes>| async move {
            let status = if req.headers().contains_key(AUTHORIZATION) {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            Ok::<_, BoxError>(
                Response::builder()
                    .status(status)
                    .body(req.into_body())
                    .unwrap(),
            )
        });

        let client = TransportBuilder::new()
            .with_credentials(Credentials::bearer("abc").unwrap())
            .build_with(transport);

        let response = client
            .clone()
            .oneshot(Request::new(Full::new(Bytes::from_static(b"ping"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.into_body(), Bytes::from_static(b"ping"));
        assert_eq!(client.pacer().snapshot().remaining, 9);
    }

    #[tokio::test]
    async fn each_build_creates_one_pacer_unless_shared() {
        let transport = service_fn(|_req: Request<Bytes>| async {
            Ok::<_, BoxError>(Response::new(()))
        });

        let first = TransportBuilder::new().build_with::<_, Full<Bytes>, ()>(transport);
        let second = TransportBuilder::new().build_with::<_, Full<Bytes>, ()>(transport);
        assert!(!Arc::ptr_eq(first.pacer(), second.pacer()));

        let shared = TransportBuilder::new()
            .with_pacer(Arc::clone(first.pacer()))
            .build_with::<_, Full<Bytes>, ()>(transport);
        assert!(Arc::ptr_eq(first.pacer(), shared.pacer()));

        shared.oneshot(Request::new(Full::default())).await.unwrap();
        assert_eq!(first.pacer().snapshot().remaining, 9);
        assert_eq!(second.pacer().snapshot().remaining, 10);
    }
}
