use std::ops::ControlFlow;
use std::time::Duration;
use std::time::SystemTime;

use super::DEFAULT_LIMIT;
use super::Reason;

/// What a single response told us about the server's budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// Nothing usable on the response.
    Unchanged,
    /// A fronting CDN throttled us without budget headers. Everyone backs off.
    EdgeThrottle { pause: Duration },
    /// The server reported its view of the budget.
    Budget {
        remaining: u64,
        limit: u64,
        reset_at: Option<SystemTime>,
    },
}

/// Token budget shared by every outbound request.
///
/// All instants are offsets from an anchor owned by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateBudget {
    limit: u64,
    remaining: u64,
    reset_at: Option<SystemTime>,
    last_refill: Option<Duration>,
    pause_until: Option<Duration>,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl RateBudget {
    /// A full budget of `limit` tokens.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: None,
            last_refill: None,
            pause_until: None,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the server said the budget fully refills, if it said so.
    pub fn reset_at(&self) -> Option<SystemTime> {
        self.reset_at
    }

    pub fn last_refill(&self) -> Option<Duration> {
        self.last_refill
    }

    /// The pause deadline, even if it has already passed but not been cleared.
    pub fn pause_until(&self) -> Option<Duration> {
        self.pause_until
    }

    pub fn is_paused(&self, now: Duration) -> bool {
        self.pause_until.is_some_and(|until| now < until)
    }

    /// Add one token per elapsed `interval` since the last refill.
    ///
    /// The baseline only advances by whole intervals so the remainder counts
    /// towards the next token.
    pub fn refill(&mut self, now: Duration, interval: Duration) {
        let Some(last) = self.last_refill else {
            self.last_refill = Some(now);
            return;
        };
        if interval.is_zero() {
            self.remaining = self.limit;
            self.last_refill = Some(now);
            return;
        }

        let elapsed = now.saturating_sub(last);
        let intervals = elapsed.as_nanos() / interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let added = u64::try_from(intervals).unwrap_or(u64::MAX);
        self.remaining = self.remaining.saturating_add(added).min(self.limit);

        let advance = interval.as_nanos().saturating_mul(intervals);
        let advance = Duration::from_nanos(u64::try_from(advance).unwrap_or(u64::MAX));
        self.last_refill = Some(last.saturating_add(advance).min(now));
    }

    /// Try to consume one token.
    ///
    /// An expired pause is cleared here and refills the budget to full.
    pub fn take(&mut self, now: Duration, interval: Duration) -> ControlFlow<Reason> {
        if let Some(until) = self.pause_until {
            if now < until {
                self.remaining = 0;
                return ControlFlow::Break(Reason::Paused {
                    retry_after: until - now,
                });
            }
            self.pause_until = None;
            self.remaining = self.limit;
            self.last_refill = Some(now);
        }

        self.refill(now, interval);

        if self.remaining == 0 {
            return ControlFlow::Break(Reason::Exhausted {
                retry_after: interval,
            });
        }
        self.remaining -= 1;
        ControlFlow::Continue(())
    }

    /// Fold what a response told us into the budget.
    pub fn apply(&mut self, observation: &Observation, now: Duration) {
        match *observation {
            Observation::Unchanged => {}
            Observation::EdgeThrottle { pause } => {
                let until = now.saturating_add(pause);
                // A later pause is never shortened by an earlier one.
                self.pause_until = Some(self.pause_until.map_or(until, |u| u.max(until)));
                self.remaining = 0;
            }
            Observation::Budget {
                remaining,
                limit,
                reset_at,
            } => {
                self.limit = limit;
                self.remaining = remaining.min(limit);
                if reset_at.is_some() {
                    self.reset_at = reset_at;
                }
                self.last_refill = Some(now);
                if self.is_paused(now) {
                    self.remaining = 0;
                }
            }
        }
    }
}
