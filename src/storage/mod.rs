//! Persistence traits for subscriptions and live-held resources.
//!
//! Implement these to connect tiergate to your database. Counter rows live
//! behind [`CounterStore`](crate::metering::CounterStore) instead.
//! In-memory implementations are provided for testing.

#[cfg(feature = "seaorm")]
pub mod sea_orm_store;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};
use crate::plans::Resource;

/// Subscription status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(TiergateError::internal(format!(
                "unknown subscription status '{}'",
                other
            ))),
        }
    }
}

/// The single active subscription of a subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub subject_id: String,
    /// The only field plan changes mutate.
    pub plan_id: String,
    pub status: SubscriptionStatus,
    /// First day of the first billing cycle. Later cycles start on the same
    /// day of month.
    pub cycle_anchor: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    #[must_use]
    pub fn new(subject_id: impl Into<String>, plan_id: impl Into<String>, cycle_anchor: NaiveDate) -> Self {
        Self {
            subject_id: subject_id.into(),
            plan_id: plan_id.into(),
            status: SubscriptionStatus::Active,
            cycle_anchor,
            updated_at: Utc::now(),
        }
    }

    /// Active or trialing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    #[must_use]
    pub fn is_trialing(&self) -> bool {
        self.status == SubscriptionStatus::Trialing
    }

    #[must_use]
    pub fn is_past_due(&self) -> bool {
        self.status == SubscriptionStatus::PastDue
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status == SubscriptionStatus::Canceled
    }

    /// Copy with a new plan id.
    #[must_use]
    pub fn with_plan(&self, plan_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// How overflow of a live resource is enforced after a downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// Excess rows are deactivated when the downgrade executes.
    Deactivate,
    /// Rows stay; access is checked at use time.
    Lazy,
}

/// Kinds of live-held resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Workspace,
    TeamMember,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Workspace, ResourceKind::TeamMember];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::TeamMember => "team_member",
        }
    }

    /// The plan limit governing this kind.
    #[must_use]
    pub fn resource(&self) -> Resource {
        match self {
            Self::Workspace => Resource::Workspaces,
            Self::TeamMember => Resource::TeamMembers,
        }
    }

    #[must_use]
    pub fn enforcement(&self) -> Enforcement {
        match self {
            Self::Workspace => Enforcement::Deactivate,
            Self::TeamMember => Enforcement::Lazy,
        }
    }

    /// The live kind limited by `resource`, if it is a live resource.
    #[must_use]
    pub fn for_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Workspaces => Some(Self::Workspace),
            Resource::TeamMembers => Some(Self::TeamMember),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A workspace or team member row owned by a subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveResource {
    pub id: String,
    pub active: bool,
    /// `None` if never used.
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LiveResource {
    #[must_use]
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            active: true,
            last_used_at: None,
            created_at,
        }
    }

    #[must_use]
    pub fn last_used(mut self, at: DateTime<Utc>) -> Self {
        self.last_used_at = Some(at);
        self
    }
}

/// Deterministic least-recently-used-first order.
///
/// Never-used rows come first, then by last use, then creation time, then id.
pub fn least_recently_used_first(a: &LiveResource, b: &LiveResource) -> Ordering {
    a.last_used_at
        .cmp(&b.last_used_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Subscription persistence.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_subscription(&self, subject_id: &str) -> Result<Option<Subscription>>;

    /// Insert or replace the subscription for `subscription.subject_id`.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<()>;
}

/// Live-held resource persistence.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Active rows of `kind` owned by `subject_id`, in any order.
    async fn list_active(&self, subject_id: &str, kind: ResourceKind) -> Result<Vec<LiveResource>>;

    async fn count_active(&self, subject_id: &str, kind: ResourceKind) -> Result<u64> {
        Ok(self.list_active(subject_id, kind).await?.len() as u64)
    }

    /// Mark rows inactive in one atomic operation. Rows are never deleted.
    ///
    /// Already-inactive or unknown ids are skipped. Returns the ids that this
    /// call actually deactivated.
    async fn deactivate(
        &self,
        subject_id: &str,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for Arc<T> {
    async fn get_subscription(&self, subject_id: &str) -> Result<Option<Subscription>> {
        (**self).get_subscription(subject_id).await
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        (**self).save_subscription(subscription).await
    }
}

#[async_trait]
impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    async fn list_active(&self, subject_id: &str, kind: ResourceKind) -> Result<Vec<LiveResource>> {
        (**self).list_active(subject_id, kind).await
    }

    async fn count_active(&self, subject_id: &str, kind: ResourceKind) -> Result<u64> {
        (**self).count_active(subject_id, kind).await
    }

    async fn deactivate(
        &self,
        subject_id: &str,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<Vec<String>> {
        (**self).deactivate(subject_id, kind, ids).await
    }
}

/// In-memory stores for testing.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test {
    use super::*;
    use crate::metering::{CounterKey, CounterOutcome, CounterStore};
    use crate::plans::Limit;
    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    /// In-memory subscription store.
    #[derive(Default, Clone)]
    pub struct InMemorySubscriptionStore {
        inner: Arc<InMemorySubscriptionStoreInner>,
    }

    #[derive(Default)]
    struct InMemorySubscriptionStoreInner {
        subscriptions: RwLock<HashMap<String, Subscription>>,
        saves: AtomicUsize,
        unavailable: AtomicBool,
    }

    impl InMemorySubscriptionStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a subscription without counting it as a save.
        pub fn insert(&self, subscription: Subscription) {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(subscription.subject_id.clone(), subscription);
        }

        /// Number of `save_subscription` calls so far.
        pub fn save_count(&self) -> usize {
            self.inner.saves.load(AtomicOrdering::SeqCst)
        }

        /// Make every call fail with `StoreUnavailable`.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.inner.unavailable.store(unavailable, AtomicOrdering::SeqCst);
        }

        fn check_available(&self) -> Result<()> {
            if self.inner.unavailable.load(AtomicOrdering::SeqCst) {
                return Err(TiergateError::store_unavailable("subscription store offline"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SubscriptionStore for InMemorySubscriptionStore {
        async fn get_subscription(&self, subject_id: &str) -> Result<Option<Subscription>> {
            self.check_available()?;
            Ok(self.inner.subscriptions.read().unwrap().get(subject_id).cloned())
        }

        async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
            self.check_available()?;
            self.inner.saves.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(subscription.subject_id.clone(), subscription.clone());
            Ok(())
        }
    }

    /// In-memory live-resource store.
    #[derive(Default, Clone)]
    pub struct InMemoryResourceStore {
        inner: Arc<InMemoryResourceStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryResourceStoreInner {
        rows: RwLock<HashMap<(String, ResourceKind), Vec<LiveResource>>>,
        unavailable: RwLock<Vec<ResourceKind>>,
    }

    impl InMemoryResourceStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, subject_id: &str, kind: ResourceKind, resource: LiveResource) {
            self.inner
                .rows
                .write()
                .unwrap()
                .entry((subject_id.to_string(), kind))
                .or_default()
                .push(resource);
        }

        /// All rows of `kind`, active or not.
        pub fn all(&self, subject_id: &str, kind: ResourceKind) -> Vec<LiveResource> {
            self.inner
                .rows
                .read()
                .unwrap()
                .get(&(subject_id.to_string(), kind))
                .cloned()
                .unwrap_or_default()
        }

        /// Make every call for `kind` fail with `StoreUnavailable`.
        pub fn set_unavailable(&self, kind: ResourceKind, unavailable: bool) {
            let mut kinds = self.inner.unavailable.write().unwrap();
            kinds.retain(|k| *k != kind);
            if unavailable {
                kinds.push(kind);
            }
        }

        fn check_available(&self, kind: ResourceKind) -> Result<()> {
            if self.inner.unavailable.read().unwrap().contains(&kind) {
                return Err(TiergateError::store_unavailable(format!(
                    "{} store offline",
                    kind
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ResourceStore for InMemoryResourceStore {
        async fn list_active(&self, subject_id: &str, kind: ResourceKind) -> Result<Vec<LiveResource>> {
            self.check_available(kind)?;
            Ok(self
                .all(subject_id, kind)
                .into_iter()
                .filter(|r| r.active)
                .collect())
        }

        async fn deactivate(
            &self,
            subject_id: &str,
            kind: ResourceKind,
            ids: &[String],
        ) -> Result<Vec<String>> {
            self.check_available(kind)?;
            let mut rows = self.inner.rows.write().unwrap();
            let mut changed = Vec::new();
            if let Some(resources) = rows.get_mut(&(subject_id.to_string(), kind)) {
                for resource in resources.iter_mut() {
                    if resource.active && ids.contains(&resource.id) {
                        resource.active = false;
                        changed.push(resource.id.clone());
                    }
                }
            }
            Ok(changed)
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum FailureMode {
        Unavailable,
        Hanging,
        Internal,
    }

    /// Counter store that always fails.
    #[derive(Clone, Debug)]
    pub struct FailingCounterStore {
        mode: FailureMode,
    }

    impl FailingCounterStore {
        /// Fails with `StoreUnavailable`.
        pub fn unavailable() -> Self {
            Self {
                mode: FailureMode::Unavailable,
            }
        }

        /// Never completes.
        pub fn hanging() -> Self {
            Self {
                mode: FailureMode::Hanging,
            }
        }

        /// Fails with `Internal`.
        pub fn internal() -> Self {
            Self {
                mode: FailureMode::Internal,
            }
        }

        async fn fail<T>(&self) -> Result<T> {
            match self.mode {
                FailureMode::Unavailable => Err(TiergateError::store_unavailable("connection refused")),
                FailureMode::Hanging => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(TiergateError::store_unavailable("hung"))
                }
                FailureMode::Internal => Err(TiergateError::internal("corrupt counter row")),
            }
        }
    }

    #[async_trait]
    impl CounterStore for FailingCounterStore {
        async fn check_and_increment(
            &self,
            _key: &CounterKey,
            _limit: Limit,
            _ttl_hint: Option<Duration>,
        ) -> Result<CounterOutcome> {
            self.fail().await
        }

        async fn current_count(&self, _key: &CounterKey) -> Result<u64> {
            self.fail().await
        }
    }
}
