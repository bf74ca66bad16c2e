//! Rate and idempotency guards.

pub mod idempotency;
pub mod rate_limiter;

pub use idempotency::{IdempotencyGuard, IdempotencyOutcome};
pub use rate_limiter::RateLimiter;
