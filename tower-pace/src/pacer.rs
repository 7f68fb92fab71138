use std::ops::ControlFlow;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::SystemTime;

use http::HeaderMap;
use http::StatusCode;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use pace_limit::DEFAULT_EDGE_PAUSE;
use pace_limit::DEFAULT_REFILL_INTERVAL;
use pace_limit::Observation;
use pace_limit::RateBudget;
use pace_limit::Reason;

use crate::Context;
use crate::EffectiveContext;
use crate::PaceError;
use crate::headers;

#[derive(Clone, Debug)]
struct PacerMetrics {
    waits: Counter<u64>,
    edge_pauses: Counter<u64>,
}

/// A point-in-time copy of the pacer's budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<SystemTime>,
    pub paused: bool,
}

/// Process-wide gate consulted before every outbound request.
///
/// One pacer is shared, via `Arc`, by every pipeline that talks to the same
/// server. The budget lock is never held across an await.
#[derive(Debug)]
pub struct Pacer {
    budget: Mutex<RateBudget>,
    anchor: Instant,
    refill_interval: Duration,
    edge_pause: Duration,
    lifetime: Context,
    instruments: PacerMetrics,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(Context::background())
    }
}

impl Pacer {
    /// Create a pacer that lives as long as `lifetime`.
    ///
    /// Once `lifetime` ends, every wait inside the pacer is abandoned.
    pub fn new(lifetime: Context) -> Self {
        let meter = global::meter("pacer");
        let instruments = PacerMetrics {
            waits: meter.u64_counter("pacer_waits").build(),
            edge_pauses: meter.u64_counter("edge_pauses").build(),
        };

        Self {
            budget: Mutex::new(RateBudget::default()),
            anchor: Instant::now(),
            refill_interval: DEFAULT_REFILL_INTERVAL,
            edge_pause: DEFAULT_EDGE_PAUSE,
            lifetime,
            instruments,
        }
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }

    /// How long everyone backs off after an edge throttle.
    pub fn with_edge_pause(mut self, pause: Duration) -> Self {
        self.edge_pause = pause;
        self
    }

    /// Replace the starting budget.
    pub fn with_budget(mut self, budget: RateBudget) -> Self {
        self.budget = Mutex::new(budget);
        self
    }

    pub fn lifetime(&self) -> &Context {
        &self.lifetime
    }

    /// Wait for a token and consume it.
    ///
    /// Never fails because the budget is empty; only because `ctx` or the
    /// pacer's lifetime ended.
    pub async fn acquire(&self, ctx: &Context) -> Result<(), PaceError> {
        loop {
            if let Some(err) = ctx.err().or_else(|| self.lifetime.err()) {
                return Err(err);
            }

            let reason = {
                let now = self.now();
                let mut budget = self.lock();
                let was_paused = budget.pause_until().is_some();
                match budget.take(now, self.refill_interval) {
                    ControlFlow::Continue(()) => {
                        if was_paused {
                            debug!(limit = budget.limit(), "global pause lifted");
                        }
                        return Ok(());
                    }
                    ControlFlow::Break(reason) => reason,
                }
            };

            let kind = match reason {
                Reason::Paused { .. } => "paused",
                Reason::Exhausted { .. } => "exhausted",
            };
            self.instruments
                .waits
                .add(1, &[KeyValue::new("reason", kind)]);
            trace!(reason = kind, wait = ?reason.retry_after(), "waiting for budget");

            self.sleep(ctx, reason.retry_after()).await?;
        }
    }

    /// Sleep unless `ctx` or the pacer's lifetime ends first.
    async fn sleep(&self, ctx: &Context, duration: Duration) -> Result<(), PaceError> {
        tokio::select! {
            biased;
            err = self.lifetime.done() => Err(err),
            slept = ctx.sleep(duration) => slept,
        }
    }

    /// Fold a response's rate limit headers into the budget. Never blocks.
    pub fn observe(&self, status: StatusCode, headers: &HeaderMap) {
        let observation = headers::observation(status, headers, self.edge_pause);
        if observation == Observation::Unchanged {
            return;
        }

        let now = self.now();
        self.lock().apply(&observation, now);

        match observation {
            Observation::EdgeThrottle { pause } => {
                self.instruments.edge_pauses.add(1, &[]);
                debug!(pause = ?pause, "edge throttle observed, pausing all requests");
            }
            Observation::Budget {
                remaining, limit, ..
            } => {
                trace!(remaining, limit, "server budget observed");
            }
            Observation::Unchanged => {}
        }
    }

    /// The context a request should wait under: ends with the caller or with
    /// this pacer, whichever comes first.
    pub fn wrap(&self, caller: &Context) -> EffectiveContext {
        self.lifetime.merge(caller)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let now = self.now();
        let budget = self.lock();
        BudgetSnapshot {
            limit: budget.limit(),
            remaining: budget.remaining(),
            reset_at: budget.reset_at(),
            paused: budget.is_paused(now),
        }
    }

    fn now(&self) -> Duration {
        Instant::now().duration_since(self.anchor)
    }

    fn lock(&self) -> MutexGuard<'_, RateBudget> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
