//! Backoff policy and cooperative cancellation for analyzer calls.
//!
//! # Retry Strategy
//!
//! - `max_attempts` counts every call, including the first
//! - Exponential backoff: base, 2x base, 4x base, ... capped at `max_delay`
//! - An analyzer-provided wait replaces the backoff step but is still capped
//! - Uniform random jitter of up to `jitter_ratio` of the wait is added
//! - Waits go through a [`CancellationToken`] so a cancelled batch wakes up

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per chunk (default: 5)
    pub max_attempts: usize,
    /// Backoff before the first retry (default: 1s)
    pub base_delay: Duration,
    /// Upper bound for any single wait before jitter (default: 60s)
    pub max_delay: Duration,
    /// Jitter as a fraction of the wait, 0.0 - 1.0 (default: 0.25)
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter_ratio: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_ratio,
        }
    }

    /// Policy without waits, for tests and dry runs.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Backoff for a 0-indexed retry: `min(base * 2^attempt, max_delay)`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(32) as i32;
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Wait before the next attempt, without jitter.
    ///
    /// An analyzer hint takes precedence over the backoff step.
    pub fn base_wait(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        match hint {
            Some(retry_after) => retry_after.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }

    /// Wait before the next attempt, with uniform jitter added.
    pub fn wait_duration(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        let base = self.base_wait(attempt, hint);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=base.as_secs_f64() * ratio);
        base + Duration::from_secs_f64(jitter)
    }

    /// Whether another attempt is allowed after `attempts_made` calls.
    pub fn should_retry(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Batch-wide cancellation flag with interruptible sleeps.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every sleeper.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns true if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        true
    }
}
