use std::sync::Arc;

use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::Credentials;
use crate::CredentialsLayer;
use crate::Pacer;
use crate::PipelineLayer;
use crate::retry::RetryConfig;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add pacing and retries, sharing `pacer` with any other stack given it.
    fn paced(self, pacer: Arc<Pacer>, retry: RetryConfig)
    -> ServiceBuilder<Stack<PipelineLayer, L>>;

    /// Add bearer credentials to every request.
    fn bearer(self, credentials: Credentials) -> ServiceBuilder<Stack<CredentialsLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn paced(
        self,
        pacer: Arc<Pacer>,
        retry: RetryConfig,
    ) -> ServiceBuilder<Stack<PipelineLayer, L>> {
        self.layer(PipelineLayer::new(pacer).with_retry(retry))
    }

    fn bearer(self, credentials: Credentials) -> ServiceBuilder<Stack<CredentialsLayer, L>> {
        self.layer(CredentialsLayer::new(credentials))
    }
}
