//! Caller contexts: cooperative cancellation plus an optional deadline.
//!
//! A request carries its [`Context`] as an `http` extension. Requests without one
//! run under [`Context::background`], which never cancels.

use std::future::pending;
use std::ops::Deref;
use std::time::Duration;

use http::Request;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;

use crate::PaceError;

/// Cancellation signal and deadline for one logical request.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Cancel this context when `token` is canceled.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Expire this context at `deadline`. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = earliest(self.deadline, Some(deadline));
        self
    }

    /// Expire this context `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The context attached to `req`, or background if there is none.
    pub fn of<B>(req: &Request<B>) -> Self {
        req.extensions().get::<Context>().cloned().unwrap_or_default()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether this context can ever end.
    pub fn is_cancelable(&self) -> bool {
        self.token.is_some() || self.deadline.is_some()
    }

    /// The reason this context has ended, if it has.
    pub fn err(&self) -> Option<PaceError> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(PaceError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(PaceError::DeadlineExceeded);
        }
        None
    }

    /// Resolves when the context ends. Never resolves for background contexts.
    pub async fn done(&self) -> PaceError {
        let canceled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = canceled => PaceError::Canceled,
            _ = expired => PaceError::DeadlineExceeded,
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), PaceError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = sleep(duration) => Ok(()),
        }
    }

    /// A context that ends when either `self` or `other` ends.
    ///
    /// If one side can never end, the other is returned as is. Deadlines merge
    /// to the earlier one. Only when both sides carry a cancellation token is a
    /// bridge task spawned; it exits on the first signal, or when the returned
    /// [`EffectiveContext`] is dropped.
    pub fn merge(&self, other: &Context) -> EffectiveContext {
        if !other.is_cancelable() {
            return EffectiveContext::direct(self.clone());
        }
        if !self.is_cancelable() {
            return EffectiveContext::direct(other.clone());
        }

        let deadline = earliest(self.deadline, other.deadline);
        match (&self.token, &other.token) {
            (Some(ours), Some(theirs)) => {
                let merged = CancellationToken::new();
                let bridge = merged.clone();
                let ours = ours.clone();
                let theirs = theirs.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = ours.cancelled() => bridge.cancel(),
                        _ = theirs.cancelled() => bridge.cancel(),
                        _ = bridge.cancelled() => {}
                    }
                });
                EffectiveContext {
                    ctx: Context {
                        token: Some(merged.clone()),
                        deadline,
                    },
                    bridge: Some(merged.drop_guard()),
                }
            }
            (ours, theirs) => EffectiveContext::direct(Context {
                token: ours.clone().or_else(|| theirs.clone()),
                deadline,
            }),
        }
    }
}

/// The context a request actually runs under.
///
/// Dropping it tears down the bridge task, if one was needed.
#[derive(Debug)]
pub struct EffectiveContext {
    ctx: Context,
    bridge: Option<DropGuard>,
}

impl EffectiveContext {
    fn direct(ctx: Context) -> Self {
        Self { ctx, bridge: None }
    }

    /// Whether a bridge task backs this context.
    pub fn is_bridged(&self) -> bool {
        self.bridge.is_some()
    }
}

impl Deref for EffectiveContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
