//! Failsafe mechanisms: per-principal rate limiting

mod rate_limiter;

pub use rate_limiter::{FixedWindowLimiter, RateLimiter, RateRecord};
