//! # Circuit Breaker Module
//!
//! Circuit breaker in front of the generation backend. After repeated
//! failures it opens and short-circuits calls, so users get an immediate
//! "service unavailable" instead of waiting out one timeout per turn.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    /// When the half-open trial call was let through
    trial_started: Option<Instant>,
}

/// Circuit breaker for generation calls
///
/// # State Machine
///
/// - **Closed**: normal operation, calls pass through
/// - **Open**: failure threshold reached, calls fail fast
/// - **Half-Open**: reset period elapsed, exactly one trial call is let
///   through and its outcome decides whether the breaker closes or reopens.
///   Concurrent callers keep failing fast while the trial is in flight. A
///   trial that never reports back is given up after another reset period.
///
/// # Configuration
///
/// Uses `BreakerConfig` for:
/// - `failure_threshold`: consecutive failures before opening (default: 5)
/// - `reset_secs`: time before letting a call through again (default: 60s)
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mealbot::circuit_breaker::CircuitBreaker;
    /// use mealbot::config::BreakerConfig;
    ///
    /// let breaker = CircuitBreaker::new(BreakerConfig::default());
    /// assert!(!breaker.is_open());
    /// ```
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Plain counters and timestamps, a poisoned lock still holds valid data
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if the breaker is open (blocking calls)
    ///
    /// A `false` answer after the reset period claims the half-open trial;
    /// the caller must report its outcome with [`Self::record_success`] or
    /// [`Self::record_failure`].
    pub fn is_open(&self) -> bool {
        self.is_open_at(Instant::now())
    }

    fn is_open_at(&self, now: Instant) -> bool {
        let mut state = self.lock();

        if state.failure_count < self.config.failure_threshold {
            return false;
        }
        let Some(last_time) = state.last_failure else {
            return false;
        };
        let reset = Duration::from_secs(self.config.reset_secs);
        if now.saturating_duration_since(last_time) < reset {
            return true;
        }

        match state.trial_started {
            Some(started) if now.saturating_duration_since(started) < reset => true,
            _ => {
                state.trial_started = Some(now);
                false
            }
        }
    }

    /// Record a failed backend call; a failed trial reopens the breaker
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.trial_started = None;
    }

    /// Record a successful backend call, closing the breaker
    pub fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}
