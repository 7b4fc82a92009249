//! Per-principal rate limiting
//!
//! The default strategy is a coarse fixed window: a counter per principal that
//! is reset wholesale once the window has elapsed. Bursts straddling a window
//! boundary can admit up to twice the quota in a short span. The `gcra`
//! strategy (backed by `governor`) smooths that out at the cost of different
//! admission behavior at window boundaries.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, clock::Clock};
use tracing::warn;

use crate::config::{RateLimitConfig, RateLimitStrategy};
use crate::{Error, Result};

/// Counter state for one principal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRecord {
    /// Calls counted in the current window, rejected ones included
    pub count: u32,
    /// Start of the current window
    pub window_start: Instant,
}

/// Fixed-window counter keyed by principal
#[derive(Debug)]
pub struct FixedWindowLimiter {
    window: Duration,
    max_per_window: u32,
    records: DashMap<String, RateRecord>,
}

impl FixedWindowLimiter {
    /// Create a limiter admitting `max_per_window` calls per `window`
    #[must_use]
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            records: DashMap::new(),
        }
    }

    /// Count a call for `principal` at `now`.
    ///
    /// The increment is kept even when the call is rejected, so retry storms
    /// stay throttled until the window rolls over.
    pub fn allow_at(&self, principal: &str, now: Instant) -> Result<()> {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut record = self
            .records
            .entry(principal.to_string())
            .or_insert_with(|| RateRecord {
                count: 0,
                window_start: now,
            });

        if now.saturating_duration_since(record.window_start) > self.window {
            record.count = 0;
            record.window_start = now;
        }

        record.count = record.count.saturating_add(1);

        if record.count > self.max_per_window {
            let elapsed = now.saturating_duration_since(record.window_start);
            return Err(Error::RateLimitExceeded {
                principal: principal.to_string(),
                retry_after: self.window.saturating_sub(elapsed),
            });
        }

        Ok(())
    }

    /// Count a call for `principal` now
    pub fn allow(&self, principal: &str) -> Result<()> {
        self.allow_at(principal, Instant::now())
    }

    /// Current record for a principal
    #[must_use]
    pub fn record(&self, principal: &str) -> Option<RateRecord> {
        self.records.get(principal).map(|r| *r)
    }
}

enum Strategy {
    FixedWindow(FixedWindowLimiter),
    Gcra(DefaultKeyedRateLimiter<String>),
}

/// Rate limiter for gateway operations
pub struct RateLimiter {
    /// Whether rate limiting is enabled
    enabled: bool,
    strategy: Strategy,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &RateLimitConfig) -> Self {
        let max = NonZeroU32::new(config.max_per_window).unwrap_or(NonZeroU32::MIN);

        let strategy = match config.strategy {
            RateLimitStrategy::FixedWindow => {
                Strategy::FixedWindow(FixedWindowLimiter::new(config.window, max.get()))
            }
            RateLimitStrategy::Gcra => {
                let period = config.window / max.get();
                let quota = Quota::with_period(period)
                    .unwrap_or_else(|| Quota::per_second(max))
                    .allow_burst(max);
                Strategy::Gcra(governor::RateLimiter::keyed(quota))
            }
        };

        Self {
            enabled: config.enabled,
            strategy,
        }
    }

    /// Admit or reject one call for `principal`
    ///
    /// # Errors
    ///
    /// [`Error::RateLimitExceeded`] once the principal's quota is spent.
    pub fn allow(&self, principal: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let result = match &self.strategy {
            Strategy::FixedWindow(limiter) => limiter.allow(principal),
            Strategy::Gcra(limiter) => limiter.check_key(&principal.to_string()).map_err(|not_until| {
                let now = governor::clock::DefaultClock::default().now();
                Error::RateLimitExceeded {
                    principal: principal.to_string(),
                    retry_after: not_until.wait_time_from(now),
                }
            }),
        };

        if let Err(Error::RateLimitExceeded { retry_after, .. }) = &result {
            warn!(principal = %principal, retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX), "Rate limit exceeded");
        }

        result
    }
}
