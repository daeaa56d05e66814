//! Short-window abuse rate limiting on the shared counter primitive.

use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::meter::{FailurePolicy, UsageMeter};
use super::period::{Clock, Period, PeriodKey};
use super::store::CounterStore;
use crate::error::Result;
use crate::plans::Limit;
use crate::utils::{env_flag, parse_env_with_prefix};

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Calls allowed per subject and action key in each one-minute window
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u64,

    /// Outcome when the counter store is unreachable
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_per_minute: default_max_per_minute(),
            failure_policy: default_failure_policy(),
        }
    }
}

impl RateLimitConfig {
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// 1000 calls per minute. For development.
    pub fn permissive() -> Self {
        Self {
            enabled: true,
            max_per_minute: 1000,
            failure_policy: FailurePolicy::Open,
        }
    }

    /// 10 calls per minute.
    pub fn restrictive() -> Self {
        Self {
            enabled: true,
            max_per_minute: 10,
            failure_policy: FailurePolicy::Open,
        }
    }

    /// Load from `TIERGATE_RATE_LIMIT_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = env_flag("RATE_LIMIT_ENABLED") {
            config.enabled = enabled;
        }

        match parse_env_with_prefix::<u64>("RATE_LIMIT_PER_MINUTE") {
            Some(Ok(val)) => config.max_per_minute = val,
            Some(Err(raw)) => {
                tracing::warn!(value = %raw, "Ignoring invalid RATE_LIMIT_PER_MINUTE");
            }
            None => {}
        }

        match parse_env_with_prefix::<FailurePolicy>("RATE_LIMIT_FAILURE_POLICY") {
            Some(Ok(policy)) => config.failure_policy = policy,
            Some(Err(raw)) => {
                tracing::warn!(value = %raw, "Ignoring invalid RATE_LIMIT_FAILURE_POLICY");
            }
            None => {}
        }

        config
    }
}

/// Builder for RateLimitConfig
#[must_use = "builder does nothing until you call build()"]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RateLimitConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn max_per_minute(mut self, max: u64) -> Self {
        self.config.max_per_minute = max;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_per_minute() -> u64 {
    60
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Open
}

/// Outcome of a rate limit check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub window: PeriodKey,
    /// Seconds until the current window closes.
    pub retry_after_secs: u64,
    pub degraded: bool,
}

impl IntoResponse for RateLimitDecision {
    fn into_response(self) -> Response {
        if self.allowed {
            return StatusCode::NO_CONTENT.into_response();
        }
        let retry_after = self.retry_after_secs;
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Too many requests",
                "limit": self.limit,
                "retry_after_secs": retry_after,
            })),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Per-minute limiter for abuse prevention.
///
/// Keys are `YYYY-MM-DD-HH-mm` windows with a two-window TTL hint. Store
/// failures never block the caller: the limiter fails open and logs.
#[derive(Clone, Debug)]
pub struct RateLimiter<C> {
    meter: UsageMeter<C>,
    config: RateLimitConfig,
}

impl<C: CounterStore> RateLimiter<C> {
    #[must_use]
    pub fn new(store: C, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        let meter = UsageMeter::new(store)
            .with_clock(clock)
            .with_period(Period::Minute)
            .with_failure_policy(config.failure_policy);
        Self { meter, config }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one call of `action_key` by `subject_id` against this minute's window.
    pub async fn check(&self, subject_id: &str, action_key: &str) -> Result<RateLimitDecision> {
        let now = self.meter.clock().now();
        let window = Period::Minute.key_at(now);
        let retry_after_secs = seconds_until_close(&window, now);
        let limit = self.config.max_per_minute;

        if !self.config.enabled {
            return Ok(RateLimitDecision {
                allowed: true,
                count: 0,
                limit,
                window,
                retry_after_secs,
                degraded: false,
            });
        }

        let counter = format!("ratelimit:{}", action_key);
        match self
            .meter
            .check_and_increment_counter(subject_id, &counter, Limit::Finite(limit))
            .await
        {
            Ok(metered) => {
                if !metered.allowed && !metered.degraded {
                    tracing::info!(
                        target: "tiergate::metering",
                        subject_id = %subject_id,
                        action = %action_key,
                        count = metered.count,
                        limit,
                        "Rate limit exceeded"
                    );
                }
                // The meter read its own clock, so time the window it counted in
                let retry_after_secs = seconds_until_close(&metered.period, self.meter.clock().now());
                Ok(RateLimitDecision {
                    allowed: metered.allowed,
                    count: metered.count,
                    limit,
                    window: metered.period,
                    retry_after_secs,
                    degraded: metered.degraded,
                })
            }
            Err(e) => {
                tracing::warn!(
                    target: "tiergate::metering",
                    subject_id = %subject_id,
                    action = %action_key,
                    error = %e,
                    "Rate limiter store failed, allowing request"
                );
                Ok(RateLimitDecision {
                    allowed: true,
                    count: 0,
                    limit,
                    window,
                    retry_after_secs,
                    degraded: true,
                })
            }
        }
    }
}

/// Seconds from `now` until the minute window keyed `window` closes.
fn seconds_until_close(window: &PeriodKey, now: DateTime<Utc>) -> u64 {
    match NaiveDateTime::parse_from_str(window.as_str(), Period::Minute.format()) {
        Ok(start) => {
            let end = start.and_utc() + chrono::Duration::seconds(60);
            u64::try_from((end - now).num_seconds()).unwrap_or(0)
        }
        Err(_) => 60u64.saturating_sub(u64::from(now.second())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::{FixedClock, InMemoryCounterStore};
    use crate::storage::test::FailingCounterStore;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 20, 12, 30, 15).unwrap()))
    }

    /// Moves one second forward on every read.
    #[derive(Debug)]
    struct TickingClock(std::sync::Mutex<DateTime<Utc>>);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut guard = self.0.lock().unwrap();
            let now = *guard;
            *guard += chrono::Duration::seconds(1);
            now
        }
    }

    #[test]
    fn test_seconds_until_close() {
        let window = PeriodKey::from("2026-01-20-12-30");
        let at = |s| Utc.with_ymd_and_hms(2026, 1, 20, 12, 30, s).unwrap();
        assert_eq!(seconds_until_close(&window, at(0)), 60);
        assert_eq!(seconds_until_close(&window, at(15)), 45);
        assert_eq!(seconds_until_close(&window, at(59)), 1);

        let later = Utc.with_ymd_and_hms(2026, 1, 20, 12, 31, 5).unwrap();
        assert_eq!(seconds_until_close(&window, later), 0);

        let next = PeriodKey::from("2026-01-20-12-31");
        assert_eq!(seconds_until_close(&next, at(59)), 61);
    }

    #[tokio::test]
    async fn test_retry_after_follows_counted_window() {
        let start = Utc.with_ymd_and_hms(2026, 1, 20, 12, 30, 59).unwrap();
        let limiter = RateLimiter::new(
            InMemoryCounterStore::new(),
            Arc::new(TickingClock(std::sync::Mutex::new(start))),
            RateLimitConfig::builder().max_per_minute(5).build(),
        );

        // Counted in the 12:31 window, read back at 12:31:01
        let decision = limiter.check("shop_1", "scan").await.unwrap();
        assert_eq!(decision.window.as_str(), "2026-01-20-12-31");
        assert_eq!(decision.retry_after_secs, 59);
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_per_minute, 60);
        assert_eq!(config.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn test_presets() {
        assert_eq!(RateLimitConfig::permissive().max_per_minute, 1000);
        assert_eq!(RateLimitConfig::restrictive().max_per_minute, 10);
    }

    #[test]
    fn test_builder() {
        let config = RateLimitConfig::builder()
            .enabled(false)
            .max_per_minute(5)
            .failure_policy(FailurePolicy::Closed)
            .build();
        assert!(!config.enabled);
        assert_eq!(config.max_per_minute, 5);
        assert_eq!(config.failure_policy, FailurePolicy::Closed);
    }

    #[tokio::test]
    async fn test_limits_within_minute_and_resets_next_minute() {
        let clock = clock();
        let limiter = RateLimiter::new(
            InMemoryCounterStore::new(),
            clock.clone(),
            RateLimitConfig::builder().max_per_minute(2).build(),
        );

        assert!(limiter.check("shop_1", "scan").await.unwrap().allowed);
        assert!(limiter.check("shop_1", "scan").await.unwrap().allowed);

        let denied = limiter.check("shop_1", "scan").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 2);
        assert_eq!(denied.window.as_str(), "2026-01-20-12-30");
        assert_eq!(denied.retry_after_secs, 45);

        // Different action keys are separate counters
        assert!(limiter.check("shop_1", "export").await.unwrap().allowed);

        clock.advance(chrono::Duration::seconds(60));
        let next = limiter.check("shop_1", "scan").await.unwrap();
        assert!(next.allowed);
        assert_eq!(next.count, 1);
    }

    #[tokio::test]
    async fn test_fails_open() {
        let limiter = RateLimiter::new(
            FailingCounterStore::unavailable(),
            clock(),
            RateLimitConfig::restrictive(),
        );
        let decision = limiter.check("shop_1", "scan").await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);

        let limiter = RateLimiter::new(
            FailingCounterStore::internal(),
            clock(),
            RateLimitConfig::restrictive(),
        );
        let decision = limiter.check("shop_1", "scan").await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
    }

    #[tokio::test]
    async fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(
            InMemoryCounterStore::new(),
            clock(),
            RateLimitConfig::builder().enabled(false).max_per_minute(0).build(),
        );
        assert!(limiter.check("shop_1", "scan").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_denied_response_is_429_with_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            count: 10,
            limit: 10,
            window: PeriodKey::from("2026-01-20-12-30"),
            retry_after_secs: 45,
            degraded: false,
        };
        let response = decision.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "45");
    }
}
