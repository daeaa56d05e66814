//! Atomic usage metering.
//!
//! The [`CounterStore`] trait is the single shared mutable primitive:
//! increment a (subject, counter, period) row by one only if it is still below
//! a ceiling. Monthly quotas ([`UsageMeter`]) and per-minute abuse limits
//! ([`RateLimiter`]) are both built on it.
//!
//! Backends:
//! - [`InMemoryCounterStore`]: sharded concurrent map, single process.
//! - `RedisCounterStore` (feature `redis`): atomic Lua script.
//! - `SeaOrmStore` (feature `seaorm`): conditional upsert.

mod meter;
mod period;
mod rate_limit;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use meter::{FailurePolicy, Metered, UsageMeter};
pub use period::{Clock, FixedClock, Period, PeriodKey, SystemClock};
pub use rate_limit::{RateLimitConfig, RateLimitConfigBuilder, RateLimitDecision, RateLimiter};
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;
pub use store::{CounterKey, CounterOutcome, CounterStore, InMemoryCounterStore};
