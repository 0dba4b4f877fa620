//! Protection against an unreliable source provider.
//!
//! - [`RateLimiter`]: adaptive delay before rate-sensitive calls
//! - [`CircuitBreaker`]: halts all work once systemic failures (429/403)
//!   reach a threshold, resuming after a cooldown
//!
//! Both are shared across workers behind an `Arc` and use interior
//! locking, so callers only need `&self`.

mod circuit;
mod limiter;

pub use circuit::{CircuitBreaker, CircuitOpen, CircuitState};
pub use limiter::RateLimiter;
