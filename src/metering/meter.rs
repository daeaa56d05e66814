//! Period-aware metering on top of a [`CounterStore`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::period::{Clock, Period, PeriodKey, SystemClock};
use super::store::{CounterKey, CounterOutcome, CounterStore};
use crate::config::MeteringConfig;
use crate::error::{Result, TiergateError};
use crate::plans::{Limit, Resource};

/// What to do when the counter store cannot confirm an increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow the action. Used for abuse rate limiting.
    Open,
    /// Deny the action. Used for billable quotas.
    Closed,
}

impl FailurePolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(TiergateError::configuration(format!(
                "unknown failure policy '{}'",
                other
            ))),
        }
    }
}

/// Result of one metered call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metered {
    pub allowed: bool,
    /// Count after the call. Zero when the store was unreachable.
    pub count: u64,
    pub period: PeriodKey,
    /// The store was unavailable and the failure policy decided the outcome.
    pub degraded: bool,
}

/// Meters one counter class (e.g. monthly quotas) against a [`CounterStore`].
///
/// Every store call is bounded by a timeout. A timed-out increment is treated
/// as a store failure, never as a success.
#[derive(Clone, Debug)]
pub struct UsageMeter<C> {
    store: C,
    clock: Arc<dyn Clock>,
    period: Period,
    failure_policy: FailurePolicy,
    timeout: Duration,
}

impl<C: CounterStore> UsageMeter<C> {
    /// Monthly, fail-closed meter using the system clock.
    #[must_use]
    pub fn new(store: C) -> Self {
        Self::from_config(store, Arc::new(SystemClock), &MeteringConfig::default())
    }

    #[must_use]
    pub fn from_config(store: C, clock: Arc<dyn Clock>, config: &MeteringConfig) -> Self {
        Self {
            store,
            clock,
            period: Period::Monthly,
            failure_policy: config.quota_failure_policy,
            timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn period(&self) -> Period {
        self.period
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Key of the current window for `resource`.
    #[must_use]
    pub fn key_for(&self, subject_id: &str, resource: Resource) -> CounterKey {
        self.key_for_counter(subject_id, resource.as_str())
    }

    #[must_use]
    pub fn key_for_counter(&self, subject_id: &str, counter: &str) -> CounterKey {
        CounterKey::new(subject_id, counter, self.period.current_key(self.clock.as_ref()))
    }

    /// Consume one unit of `resource` if the current window has room.
    pub async fn check_and_increment(
        &self,
        subject_id: &str,
        resource: Resource,
        limit: Limit,
    ) -> Result<Metered> {
        self.check_and_increment_counter(subject_id, resource.as_str(), limit)
            .await
    }

    /// Consume one unit of an arbitrary named counter.
    ///
    /// Store unavailability is resolved by the failure policy and reported
    /// with `degraded = true`. Any other store error is returned.
    pub async fn check_and_increment_counter(
        &self,
        subject_id: &str,
        counter: &str,
        limit: Limit,
    ) -> Result<Metered> {
        let key = self.key_for_counter(subject_id, counter);
        let ttl = self.period.ttl_hint();

        let result = tokio::time::timeout(
            self.timeout,
            self.store.check_and_increment(&key, limit, ttl),
        )
        .await
        .map_err(TiergateError::from)
        .and_then(|inner| inner);

        match result {
            Ok(CounterOutcome { allowed, count }) => {
                tracing::debug!(
                    target: "tiergate::metering",
                    subject_id = %subject_id,
                    counter = %counter,
                    period = %key.period,
                    allowed,
                    count,
                    limit = %limit,
                    "Counter checked"
                );
                Ok(Metered {
                    allowed,
                    count,
                    period: key.period,
                    degraded: false,
                })
            }
            Err(e) if e.is_store_unavailable() => {
                let allowed = self.failure_policy == FailurePolicy::Open;
                tracing::warn!(
                    target: "tiergate::metering",
                    subject_id = %subject_id,
                    counter = %counter,
                    period = %key.period,
                    policy = self.failure_policy.as_str(),
                    allowed,
                    error = %e,
                    "Counter store unavailable, applying failure policy"
                );
                Ok(Metered {
                    allowed,
                    count: 0,
                    period: key.period,
                    degraded: true,
                })
            }
            Err(e) => {
                tracing::error!(
                    target: "tiergate::metering",
                    subject_id = %subject_id,
                    counter = %counter,
                    error = %e,
                    "Counter store failed"
                );
                Err(e)
            }
        }
    }

    /// Read the current window's count without changing it.
    pub async fn current(&self, subject_id: &str, resource: Resource) -> Result<u64> {
        let key = self.key_for(subject_id, resource);
        tokio::time::timeout(self.timeout, self.store.current_count(&key)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::{FixedClock, InMemoryCounterStore};
    use crate::storage::test::FailingCounterStore;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_meter_uses_monthly_key() {
        let meter = UsageMeter::new(InMemoryCounterStore::new()).with_clock(clock());
        let metered = meter
            .check_and_increment("shop_1", Resource::ThemeAnalysis, Limit::Finite(5))
            .await
            .unwrap();
        assert!(metered.allowed);
        assert_eq!(metered.count, 1);
        assert_eq!(metered.period.as_str(), "2026-01");
        assert!(!metered.degraded);
        assert_eq!(
            meter.current("shop_1", Resource::ThemeAnalysis).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_window_rollover() {
        let clock = clock();
        let meter = UsageMeter::new(InMemoryCounterStore::new()).with_clock(clock.clone());

        for _ in 0..3 {
            meter
                .check_and_increment("shop_1", Resource::PerformanceAudit, Limit::Finite(3))
                .await
                .unwrap();
        }
        let denied = meter
            .check_and_increment("shop_1", Resource::PerformanceAudit, Limit::Finite(3))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);

        clock.set(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        let fresh = meter
            .check_and_increment("shop_1", Resource::PerformanceAudit, Limit::Finite(3))
            .await
            .unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.period.as_str(), "2026-02");
    }

    #[tokio::test]
    async fn test_fail_closed_denies_with_degraded_flag() {
        let meter = UsageMeter::new(FailingCounterStore::unavailable())
            .with_clock(clock())
            .with_failure_policy(FailurePolicy::Closed);
        let metered = meter
            .check_and_increment("shop_1", Resource::ThemeAnalysis, Limit::Finite(5))
            .await
            .unwrap();
        assert!(!metered.allowed);
        assert!(metered.degraded);
    }

    #[tokio::test]
    async fn test_fail_open_allows_with_degraded_flag() {
        let meter = UsageMeter::new(FailingCounterStore::unavailable())
            .with_clock(clock())
            .with_failure_policy(FailurePolicy::Open);
        let metered = meter
            .check_and_increment_counter("shop_1", "login", Limit::Finite(5))
            .await
            .unwrap();
        assert!(metered.allowed);
        assert!(metered.degraded);
    }

    #[tokio::test]
    async fn test_timeout_is_not_success() {
        let meter = UsageMeter::new(FailingCounterStore::hanging())
            .with_clock(clock())
            .with_timeout(Duration::from_millis(20));
        let metered = meter
            .check_and_increment("shop_1", Resource::ThemeAnalysis, Limit::Unlimited)
            .await
            .unwrap();
        assert!(!metered.allowed);
        assert!(metered.degraded);
    }

    #[tokio::test]
    async fn test_non_availability_errors_propagate() {
        let meter = UsageMeter::new(FailingCounterStore::internal()).with_clock(clock());
        let err = meter
            .check_and_increment("shop_1", Resource::ThemeAnalysis, Limit::Finite(1))
            .await
            .unwrap_err();
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("OPEN".parse::<FailurePolicy>().unwrap(), FailurePolicy::Open);
        assert_eq!("closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::Closed);
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }
}
