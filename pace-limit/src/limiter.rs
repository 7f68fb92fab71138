use std::ops::ControlFlow;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use quanta::Clock;
use quanta::Instant;

use crate::DEFAULT_REFILL_INTERVAL;
use crate::Observation;
use crate::RateBudget;
use crate::Reason;
use crate::Strategy;

/// A non-blocking budget gate for callers that do their own waiting.
///
/// Shares its semantics with the async pacer but never sleeps: `process`
/// either consumes a token or says how long to back off.
#[derive(Debug)]
pub struct BudgetLimiter {
    budget: Mutex<RateBudget>,
    interval: Duration,
    clock: Clock,
    /// A fixed point in time to calculate offsets from.
    anchor: Instant,
}

impl Default for BudgetLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetLimiter {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    pub fn with_clock(clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            budget: Mutex::new(RateBudget::default()),
            interval: DEFAULT_REFILL_INTERVAL,
            clock,
            anchor,
        }
    }

    /// Replace the starting budget.
    pub fn with_budget(self, budget: RateBudget) -> Self {
        Self {
            budget: Mutex::new(budget),
            ..self
        }
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Fold a response observation into the budget.
    pub fn observe(&self, observation: &Observation) {
        let now = self.now();
        self.lock().apply(observation, now);
    }

    /// A copy of the current budget, with time-based refill applied.
    pub fn snapshot(&self) -> RateBudget {
        let now = self.now();
        let mut budget = self.lock();
        if !budget.is_paused(now) {
            budget.refill(now, self.interval);
        }
        budget.clone()
    }

    pub fn is_paused(&self) -> bool {
        let now = self.now();
        self.lock().is_paused(now)
    }

    fn now(&self) -> Duration {
        self.clock.now().duration_since(self.anchor)
    }

    fn lock(&self) -> MutexGuard<'_, RateBudget> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Strategy for BudgetLimiter {
    #[inline]
    fn process(&self) -> ControlFlow<Reason> {
        let now = self.now();
        self.lock().take(now, self.interval)
    }
}
