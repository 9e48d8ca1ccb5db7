//! Session restart backoff and apply throttling.
//!
//! - [`RetryConfig`]: how many times, and how long after, the supervisor
//!   starts a fresh session following a transient failure
//! - [`RateLimiter`]: token bucket in front of destination applies
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use oplog_sync::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! // At most 500 applies per second, bursts of 50
//! let limiter = RateLimiter::new(RateLimitConfig { burst_size: 50, refill_rate: 500 });
//! let waited = limiter.throttle().await;
//!
//! // Pause before the third restart of a long-running mirror
//! let pause = RetryConfig::daemon().delay_for_attempt(3);
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

/// Restart policy for failed sessions.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Restarts allowed after the first session; `usize::MAX` never gives up.
    pub max_attempts: usize,

    /// Pause before the first restart.
    pub initial_delay: Duration,

    /// Longest pause between restarts.
    pub max_delay: Duration,

    /// Growth of the pause per restart.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Keep restarting a long-running mirror forever.
    ///
    /// ```text
    /// Restart  Pause
    /// -------  -----
    /// 1        1s
    /// 2        2s
    /// 3        4s
    /// ...
    /// 9+       300s
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }

    /// A single session, no restarts.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Three quick restarts, for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Whether another attempt is allowed after `retries` so far.
    pub fn allows_retry(&self, retries: usize) -> bool {
        retries < self.max_attempts
    }

    /// Pause before restart number `attempt` (1-based; 0 is treated as 1).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

// =============================================================================
// Apply Throttling
// =============================================================================

/// Apply throttle settings.
///
/// Tokens refill at `refill_rate` per second up to `burst_size`; every
/// apply takes one. Zero values are clamped to one.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitConfig {
    pub burst_size: u32,
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_size: 100,
            refill_rate: 1000,
        }
    }
}

/// Token bucket in front of the destination.
pub struct RateLimiter {
    bucket: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        Self {
            bucket: GovLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            config,
        }
    }

    /// Wait for a token. Returns how long the caller was held back.
    ///
    /// Cancel-safe.
    pub async fn throttle(&self) -> Duration {
        if self.bucket.check().is_ok() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        self.bucket.until_ready().await;
        start.elapsed()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
