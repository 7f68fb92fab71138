use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context as TaskContext;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http::Response;
use http::StatusCode;
use http_body::Body;
use http_body_util::BodyExt;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::debug;

use crate::Context;
use crate::Pacer;
use crate::headers;
use crate::retry::Outcome;
use crate::retry::RetryConfig;

#[derive(Clone, Debug)]
struct PipelineMetrics {
    attempts: Counter<u64>,
    retries: Counter<u64>,
}

/// Drives one logical request through pacing, sending and retrying.
///
/// The request body is buffered once, so every attempt sends the same bytes.
/// Responses that are retried are dropped before the backoff sleep; only the
/// final attempt's response reaches the caller.
#[derive(Debug)]
pub struct PipelineService<S> {
    inner: S,
    pacer: Arc<Pacer>,
    retry: RetryConfig,
    instruments: PipelineMetrics,
}

impl<S: Clone> Clone for PipelineService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pacer: Arc::clone(&self.pacer),
            retry: self.retry.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S> PipelineService<S> {
    pub fn new(inner: S, pacer: Arc<Pacer>, retry: RetryConfig) -> Self {
        let meter = global::meter("pipeline_service");
        let instruments = PipelineMetrics {
            attempts: meter.u64_counter("pipeline_attempts").build(),
            retries: meter.u64_counter("pipeline_retries").build(),
        };

        Self {
            inner,
            pacer,
            retry,
            instruments,
        }
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

impl<S, B, R> Service<Request<B>> for PipelineService<S>
where
    S: Service<Request<Bytes>, Response = Response<R>, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    R: Send + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<R>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<R>, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(send(
            inner,
            Arc::clone(&self.pacer),
            self.retry.clone(),
            self.instruments.clone(),
            req,
        ))
    }
}

async fn send<S, B, R>(
    mut inner: S,
    pacer: Arc<Pacer>,
    retry: RetryConfig,
    instruments: PipelineMetrics,
    req: Request<B>,
) -> Result<Response<R>, BoxError>
where
    S: Service<Request<Bytes>, Response = Response<R>, Error = BoxError>,
    B: Body,
    B::Error: Into<BoxError>,
{
    let ctx = pacer.wrap(&Context::of(&req));
    let (parts, body) = req.into_parts();

    let body = tokio::select! {
        biased;
        err = ctx.done() => return Err(err.into()),
        collected = body.collect() => collected.map_err(Into::<BoxError>::into)?.to_bytes(),
    };

    let max_attempts = retry.max_attempts();
    let mut attempt: u32 = 0;

    loop {
        pacer.acquire(&ctx).await?;
        instruments.attempts.add(1, &[]);

        let request = Request::from_parts(parts.clone(), body.clone());
        let result = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            result = call_once(&mut inner, request) => result,
        };

        if let Ok(response) = &result {
            pacer.observe(response.status(), response.headers());
        }

        let should_retry = match &result {
            Ok(response) => retry.policy().should_retry(&Outcome::Response {
                status: response.status(),
                headers: response.headers(),
            }),
            Err(err) => retry.policy().should_retry(&Outcome::Error(err)),
        };
        if !should_retry || attempt + 1 >= max_attempts {
            return result;
        }

        let mut wait = retry.policy().wait(attempt + 1);
        if let Ok(response) = &result
            && response.status() == StatusCode::TOO_MANY_REQUESTS
            && let Some(retry_after) = headers::retry_after(response.headers())
        {
            wait = retry_after;
        }

        log_retry(attempt, max_attempts, wait, &parts.uri, &result);
        instruments.retries.add(
            1,
            &[KeyValue::new(
                "trigger",
                match &result {
                    Ok(_) => "status",
                    Err(_) => "error",
                },
            )],
        );

        // Release the connection before sleeping.
        let last_error = match result {
            Ok(response) => {
                drop(response);
                None
            }
            Err(err) => Some(err),
        };

        if let Err(err) = ctx.sleep(wait).await {
            return Err(last_error.unwrap_or_else(|| err.into()));
        }
        attempt += 1;
    }
}

async fn call_once<S, R>(inner: &mut S, request: Request<Bytes>) -> Result<Response<R>, BoxError>
where
    S: Service<Request<Bytes>, Response = Response<R>, Error = BoxError>,
{
    inner.ready().await?.call(request).await
}

fn log_retry<R>(
    attempt: u32,
    max_attempts: u32,
    wait: Duration,
    url: &http::Uri,
    result: &Result<Response<R>, BoxError>,
) {
    match result {
        Ok(response) => debug!(
            attempt,
            max_retries = max_attempts,
            wait_duration = ?wait,
            url = %url,
            status_code = response.status().as_u16(),
            "retrying request"
        ),
        Err(err) => debug!(
            attempt,
            max_retries = max_attempts,
            wait_duration = ?wait,
            url = %url,
            error = %err,
            "retrying request"
        ),
    }
}
