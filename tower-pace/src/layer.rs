use std::sync::Arc;

use tower::Layer;

use crate::Pacer;
use crate::retry::RetryConfig;
use crate::retry::RetryPolicy;
use crate::service::PipelineService;

/// Applies pacing and retries to requests.
///
/// Every service produced by one layer shares the same [`Pacer`].
#[derive(Clone, Debug)]
pub struct PipelineLayer {
    pacer: Arc<Pacer>,
    retry: RetryConfig,
}

impl PipelineLayer {
    /// Create a PipelineLayer with the default retry configuration.
    pub fn new(pacer: Arc<Pacer>) -> Self {
        PipelineLayer {
            pacer,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the total number of transport calls per request.
    ///
    /// The policy is kept. Zero means three attempts and one is raised to two.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry = self.retry.with_max_attempts(max_attempts);
        self
    }

    /// Replace the retry policy, keeping the attempt limit.
    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = self.retry.with_policy(policy);
        self
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, service: S) -> Self::Service {
        PipelineService::new(service, Arc::clone(&self.pacer), self.retry.clone())
    }
}
