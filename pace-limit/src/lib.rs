//! # pace-limit
//!
//! `pace-limit` models the client-side request budget of a rate limited web API.
//!
//! ## Core Philosophy
//!
//! A remote API usually tells its clients how much budget they have left, but not
//! always: some responses carry `X-Ratelimit-*` headers, some carry nothing, and a
//! fronting CDN may throttle with a bare `429`. [`RateBudget`] blends the two sources:
//!
//! * **Heuristic refill**: with no server input, tokens trickle back at a fixed
//!   interval. Fractional time is carried forward so the long-run rate is exact.
//! * **Authoritative updates**: server headers overwrite local state and reset the
//!   refill baseline, so the heuristic never adds ghost tokens on top.
//! * **Global pause**: an edge throttle installs a hard deadline that blocks every
//!   caller, independent of the token count.
//!
//! The budget is a plain state machine. Time is passed in as a `Duration` offset
//! from an anchor chosen by the owner, so any clock can drive it.
//!
//! ## Example
//!
//! ```rust
//! use pace_limit::BudgetLimiter;
//! use pace_limit::Strategy;
//!
//! let limiter = BudgetLimiter::new();
//!
//! if limiter.process().is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod budget;
mod limiter;

pub use budget::Observation;
pub use budget::RateBudget;
pub use limiter::BudgetLimiter;

/// Token capacity of a fresh budget, before the server has said anything.
pub const DEFAULT_LIMIT: u64 = 10;

/// Time between heuristic refills: 4 requests per second in steady state.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_millis(250);

/// Length of the global pause installed after an edge throttle.
pub const DEFAULT_EDGE_PAUSE: Duration = Duration::from_secs(10);

/// Reasons why a request might not be allowed through right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// No tokens left. A token may be available after `retry_after`.
    Exhausted { retry_after: Duration },
    /// A global pause is active and ends after `retry_after`.
    Paused { retry_after: Duration },
}

impl Reason {
    /// How long the caller should wait before asking again.
    pub fn retry_after(&self) -> Duration {
        match self {
            Reason::Exhausted { retry_after } | Reason::Paused { retry_after } => *retry_after,
        }
    }
}

/// The core trait for non-blocking budget checks.
///
/// Implementations are usually shared across threads behind an `Arc`.
pub trait Strategy: Debug {
    /// Attempts to consume budget for a single request.
    ///
    /// Breaks with a [`Reason`] if the request has to wait.
    fn process(&self) -> ControlFlow<Reason>;
}
