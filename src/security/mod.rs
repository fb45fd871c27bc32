//! Traffic policy: per-route rate limiting.

pub mod rate_limit;

pub use rate_limit::RateLimiter;
