//! Clocks and period keys.
//!
//! Counters are partitioned into windows by a period key derived from the
//! current time. A new key is a fresh logical counter, so nothing ever has to
//! be reset.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Start at midnight UTC on the given date.
    #[must_use]
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Window length of a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// `YYYY-MM`. Billable quotas.
    Monthly,
    /// `YYYY-MM-DD`.
    Daily,
    /// `YYYY-MM-DD-HH`.
    Hourly,
    /// `YYYY-MM-DD-HH-mm`. Abuse rate limiting.
    Minute,
}

impl Period {
    pub(super) fn format(&self) -> &'static str {
        match self {
            Self::Monthly => "%Y-%m",
            Self::Daily => "%Y-%m-%d",
            Self::Hourly => "%Y-%m-%d-%H",
            Self::Minute => "%Y-%m-%d-%H-%M",
        }
    }

    /// Key of the window containing `at`.
    #[must_use]
    pub fn key_at(&self, at: DateTime<Utc>) -> PeriodKey {
        PeriodKey(at.format(self.format()).to_string())
    }

    /// Key of the current window according to `clock`.
    #[must_use]
    pub fn current_key(&self, clock: &dyn Clock) -> PeriodKey {
        self.key_at(clock.now())
    }

    /// How long a store may keep a row for this period before reclaiming it.
    ///
    /// Monthly counters are billing records and never expire. Short windows
    /// keep two window lengths so a request straddling the boundary still
    /// sees its row.
    #[must_use]
    pub fn ttl_hint(&self) -> Option<Duration> {
        match self {
            Self::Monthly => None,
            Self::Daily => Some(Duration::from_secs(2 * 86_400)),
            Self::Hourly => Some(Duration::from_secs(2 * 3_600)),
            Self::Minute => Some(Duration::from_secs(2 * 60)),
        }
    }
}

/// A window identifier such as `"2026-01"` or `"2026-01-15-09-30"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeriodKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
