//! Retry decisions and backoff.

use std::error::Error;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::StatusCode;
use rand::Rng;
use tower::BoxError;

use crate::PaceError;

/// Total transport calls per logical request when nothing else is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// What `max_attempts = 0` is taken to mean.
pub const MIN_MAX_ATTEMPTS: u32 = 3;

/// The smallest explicit `max_attempts`: one call plus one retry.
pub const MIN_EXPLICIT_ATTEMPTS: u32 = 2;

/// The result of one attempt, as seen by a [`RetryPolicy`].
#[derive(Clone, Copy, Debug)]
pub enum Outcome<'a> {
    Response {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    Error(&'a BoxError),
}

impl Outcome<'_> {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Response { status, .. } => Some(*status),
            Outcome::Error(_) => None,
        }
    }
}

/// Coarse categories of transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    Canceled,
    DeadlineExceeded,
    Other,
}

impl ErrorKind {
    /// Categorise `err` by walking its source chain.
    pub fn classify(err: &BoxError) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(err.as_ref());
        while let Some(err) = source {
            if let Some(kind) = Self::of(err) {
                return kind;
            }
            source = err.source();
        }
        ErrorKind::Other
    }

    fn of(err: &(dyn Error + 'static)) -> Option<Self> {
        if let Some(pace) = err.downcast_ref::<PaceError>() {
            return match pace {
                PaceError::Canceled => Some(ErrorKind::Canceled),
                PaceError::DeadlineExceeded => Some(ErrorKind::DeadlineExceeded),
                _ => None,
            };
        }
        if err.is::<tower::timeout::error::Elapsed>() || err.is::<tokio::time::error::Elapsed>() {
            return Some(ErrorKind::Timeout);
        }
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return match io.kind() {
                io::ErrorKind::TimedOut => Some(ErrorKind::Timeout),
                io::ErrorKind::ConnectionRefused => Some(ErrorKind::ConnectionRefused),
                // `io::Error::source` skips the wrapped error itself.
                _ => io.get_ref().and_then(|inner| Self::of(inner)),
            };
        }
        if let Some(reqwest) = err.downcast_ref::<reqwest::Error>() {
            if reqwest.is_timeout() {
                return Some(ErrorKind::Timeout);
            }
            if reqwest.is_connect() {
                return Some(ErrorKind::ConnectionRefused);
            }
        }
        None
    }
}

/// Decides whether an attempt is worth repeating, and how long to wait first.
pub trait RetryPolicy: Debug + Send + Sync {
    fn should_retry(&self, outcome: &Outcome<'_>) -> bool;

    /// Wait before retry number `attempt`, counting from 1.
    fn wait(&self, attempt: u32) -> Duration;
}

/// Doubling backoff with symmetric jitter.
///
/// Retries `429`, every `5xx` except `501` and `505`, and timeouts, expired
/// deadlines and refused connections.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Jitter as a fraction of the delay. Clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// The delay for retry `attempt` before jitter is applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, outcome: &Outcome<'_>) -> bool {
        match outcome {
            Outcome::Response { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || (status.is_server_error()
                        && *status != StatusCode::NOT_IMPLEMENTED
                        && *status != StatusCode::HTTP_VERSION_NOT_SUPPORTED)
            }
            Outcome::Error(err) => matches!(
                ErrorKind::classify(err),
                ErrorKind::Timeout | ErrorKind::DeadlineExceeded | ErrorKind::ConnectionRefused
            ),
        }
    }

    fn wait(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter == 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range(-self.jitter..self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + factor)).max(0.0))
    }
}

/// How many times, and by which policy, a pipeline retries.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    max_attempts: u32,
    policy: Arc<dyn RetryPolicy>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryConfig {
    /// `max_attempts` counts every transport call, the first one included.
    /// Zero means [`MIN_MAX_ATTEMPTS`]; any other value is raised to at least
    /// [`MIN_EXPLICIT_ATTEMPTS`] so one retry always remains.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: Arc::new(ExponentialBackoff::default()),
        }
        .with_max_attempts(max_attempts)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 {
            MIN_MAX_ATTEMPTS
        } else {
            max_attempts.max(MIN_EXPLICIT_ATTEMPTS)
        };
        self
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }
}
