//! Counter store trait and the in-memory backend.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use super::period::PeriodKey;
use crate::error::Result;
use crate::plans::{Limit, Resource};

/// Identifies one counter row: (subject, counter name, period).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub subject_id: String,
    /// Resource name for quotas, action key for rate limits.
    pub counter: String,
    pub period: PeriodKey,
}

impl CounterKey {
    #[must_use]
    pub fn new(subject_id: impl Into<String>, counter: impl Into<String>, period: PeriodKey) -> Self {
        Self {
            subject_id: subject_id.into(),
            counter: counter.into(),
            period,
        }
    }

    /// Key of a billable quota counter.
    #[must_use]
    pub fn quota(subject_id: impl Into<String>, resource: Resource, period: PeriodKey) -> Self {
        Self::new(subject_id, resource.as_str(), period)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.subject_id, self.counter, self.period)
    }
}

/// Result of a conditional increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterOutcome {
    pub allowed: bool,
    /// Count after the call. On denial this is the unchanged current count.
    pub count: u64,
}

impl CounterOutcome {
    #[must_use]
    pub fn allowed(count: u64) -> Self {
        Self {
            allowed: true,
            count,
        }
    }

    #[must_use]
    pub fn denied(count: u64) -> Self {
        Self {
            allowed: false,
            count,
        }
    }
}

/// Atomic check-and-increment-within-ceiling over counter rows.
///
/// Implementations must make `check_and_increment` a single indivisible
/// operation in the storage engine. A missing row counts as zero. Across any
/// number of concurrent callers, the number of `allowed` outcomes for a key
/// never exceeds a finite `limit`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment by one if the current count is below `limit`.
    ///
    /// `ttl_hint` lets the backend reclaim short-window rows. `None` means the
    /// row is kept.
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        limit: Limit,
        ttl_hint: Option<Duration>,
    ) -> Result<CounterOutcome>;

    /// Read-only count for previews and "X of Y" reporting.
    ///
    /// Never use this to decide whether to increment.
    async fn current_count(&self, key: &CounterKey) -> Result<u64>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        limit: Limit,
        ttl_hint: Option<Duration>,
    ) -> Result<CounterOutcome> {
        (**self).check_and_increment(key, limit, ttl_hint).await
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u64> {
        (**self).current_count(key).await
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    const EMPTY: Self = Self {
        count: 0,
        expires_at: None,
    };

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn try_increment(&mut self, limit: Limit, ttl_hint: Option<Duration>, now: Instant) -> CounterOutcome {
        if !limit.admits_one_more(self.count) {
            return CounterOutcome::denied(self.count);
        }
        self.count = self.count.saturating_add(1);
        if self.count == 1 {
            self.expires_at = ttl_hint.map(|ttl| now + ttl);
        }
        CounterOutcome::allowed(self.count)
    }
}

/// Counter store backed by a sharded concurrent map.
///
/// Atomicity comes from the per-shard entry lock, which is held for the whole
/// compare-and-increment. Suitable for single-process deployments and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<CounterKey, Slot>>,
}

impl InMemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop rows whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            tracing::debug!(target: "tiergate::metering", removed, "Purged expired counters");
        }
        removed
    }

    /// Number of stored rows, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        limit: Limit,
        ttl_hint: Option<Duration>,
    ) -> Result<CounterOutcome> {
        let now = Instant::now();
        let outcome = match self.counters.entry(key.clone()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired(now) => {
                // An expired row restarts like a missing one
                let mut slot = Slot::EMPTY;
                let outcome = slot.try_increment(limit, ttl_hint, now);
                if outcome.allowed {
                    *occupied.get_mut() = slot;
                } else {
                    occupied.remove();
                }
                outcome
            }
            Entry::Occupied(mut occupied) => occupied.get_mut().try_increment(limit, ttl_hint, now),
            Entry::Vacant(vacant) => {
                let mut slot = Slot::EMPTY;
                let outcome = slot.try_increment(limit, ttl_hint, now);
                if outcome.allowed {
                    vacant.insert(slot);
                }
                outcome
            }
        };
        Ok(outcome)
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count)
            .unwrap_or(0))
    }
}
