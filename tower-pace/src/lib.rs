//! # Tower Pace
//!
//! `tower-pace` is a paced, retrying request transport for HTTP clients built
//! on [Tower](https://github.com/tower-rs/tower).
//!
//! Every outbound request passes through three stages:
//!
//! 1. **Pacing**: a process-wide [`Pacer`] hands out tokens from a budget that
//!    refills over time. Rate limit headers on responses overwrite the local
//!    view of the budget, and a 429 from a fronting CDN pauses every caller.
//! 2. **Sending**: the request body is buffered once and handed to a
//!    transport, by default [`ReqwestTransport`].
//! 3. **Retrying**: a [`RetryPolicy`] decides which outcomes are repeated and
//!    how long to back off. `Retry-After` on a 429 takes precedence.
//!
//! Waits end early when the request's [`Context`] is canceled or passes its
//! deadline. Attach one with `request.extensions_mut().insert(ctx)`.
//!
//! ```no_run
//! # async fn run() -> Result<(), tower::BoxError> {
//! use tower::ServiceExt;
//! use tower_pace::Credentials;
//! use tower_pace::TransportBuilder;
//!
//! let client = TransportBuilder::new()
//!     .with_credentials(Credentials::bearer("token")?)
//!     .build::<http_body_util::Empty<bytes::Bytes>>()?;
//!
//! let request = http::Request::get("https://api.example.com/v1/things")
//!     .body(http_body_util::Empty::new())?;
//! let response = client.oneshot(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod builder;
mod context;
mod credentials;
mod error;
pub mod headers;
mod layer;
mod pacer;
pub mod retry;
mod service;
mod transport;
mod utils;


pub use builder::PacedClient;
pub use builder::TransportBuilder;
pub use context::Context;
pub use context::EffectiveContext;
pub use credentials::Credentials;
pub use credentials::CredentialsLayer;
pub use credentials::CredentialsService;
pub use credentials::DEFAULT_USER_AGENT;
pub use error::PaceError;
pub use layer::PipelineLayer;
pub use pacer::BudgetSnapshot;
pub use pacer::Pacer;
pub use retry::ExponentialBackoff;
pub use retry::RetryConfig;
pub use retry::RetryPolicy;
pub use service::PipelineService;
pub use transport::DEFAULT_ATTEMPT_TIMEOUT;
pub use transport::ReqwestTransport;
pub use utils::ServiceBuilderExt;
