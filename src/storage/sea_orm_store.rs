//! SeaORM-backed persistence (PostgreSQL).
//!
//! One [`SeaOrmStore`] implements [`CounterStore`], [`SubscriptionStore`] and
//! [`ResourceStore`] over a shared connection.
//!
//! ```rust,ignore
//! use tiergate::storage::sea_orm_store::SeaOrmStore;
//!
//! let store = SeaOrmStore::new(db.clone());
//! store.create_schema().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QuerySelect, Set, Statement, TransactionTrait, sea_query::Expr, sea_query::OnConflict,
};

use super::{LiveResource, ResourceKind, ResourceStore, Subscription, SubscriptionStore};
use crate::error::Result;
use crate::metering::{CounterKey, CounterOutcome, CounterStore};
use crate::plans::Limit;

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    // -------------------------------------------------------------------------
    // Subscription Entity
    // -------------------------------------------------------------------------
    pub mod subscription {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "tiergate_subscriptions")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub subject_id: String,
            pub plan_id: String,
            pub status: String,
            pub cycle_anchor: Date,
            pub updated_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    // -------------------------------------------------------------------------
    // Live Resource Entity
    // -------------------------------------------------------------------------
    pub mod live_resource {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "tiergate_live_resources")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: String,
            pub subject_id: String,
            pub kind: String,
            pub active: bool,
            pub last_used_at: Option<DateTimeWithTimeZone>,
            pub created_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{live_resource, subscription};

/// DDL for the three tables. Counter rows are keyed by
/// (subject_id, counter, period_key); a missing row is a zero count.
pub const SCHEMA_SQL: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS tiergate_subscriptions (
        subject_id TEXT PRIMARY KEY,
        plan_id TEXT NOT NULL,
        status TEXT NOT NULL,
        cycle_anchor DATE NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tiergate_live_resources (
        id TEXT PRIMARY KEY,
        subject_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        last_used_at TIMESTAMPTZ NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tiergate_usage_counters (
        subject_id TEXT NOT NULL,
        counter TEXT NOT NULL,
        period_key TEXT NOT NULL,
        count BIGINT NOT NULL CHECK (count >= 0),
        expires_at TIMESTAMPTZ NULL,
        PRIMARY KEY (subject_id, counter, period_key)
    )",
    "CREATE INDEX IF NOT EXISTS tiergate_live_resources_subject_kind
        ON tiergate_live_resources (subject_id, kind) WHERE active",
];

const INCREMENT_UNLIMITED_SQL: &str = "INSERT INTO tiergate_usage_counters \
     (subject_id, counter, period_key, count, expires_at) VALUES ($1, $2, $3, 1, $4) \
     ON CONFLICT (subject_id, counter, period_key) \
     DO UPDATE SET count = tiergate_usage_counters.count + 1 \
     RETURNING count";

const INCREMENT_WITHIN_LIMIT_SQL: &str = "INSERT INTO tiergate_usage_counters \
     (subject_id, counter, period_key, count, expires_at) VALUES ($1, $2, $3, 1, $4) \
     ON CONFLICT (subject_id, counter, period_key) \
     DO UPDATE SET count = tiergate_usage_counters.count + 1 \
     WHERE tiergate_usage_counters.count < $5 \
     RETURNING count";

const SELECT_COUNT_SQL: &str = "SELECT count FROM tiergate_usage_counters \
     WHERE subject_id = $1 AND counter = $2 AND period_key = $3 \
     AND (expires_at IS NULL OR expires_at > now())";

const PURGE_EXPIRED_SQL: &str =
    "DELETE FROM tiergate_usage_counters WHERE expires_at IS NOT NULL AND expires_at <= now()";

// =============================================================================
// Helper Functions
// =============================================================================

/// Convert i64 to u64 safely (negative values become 0).
#[inline]
fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Convert u64 to i64 safely (values > i64::MAX become i64::MAX).
#[inline]
fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn model_to_subscription(model: subscription::Model) -> Result<Subscription> {
    Ok(Subscription {
        subject_id: model.subject_id,
        plan_id: model.plan_id,
        status: model.status.parse()?,
        cycle_anchor: model.cycle_anchor,
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn model_to_live_resource(model: live_resource::Model) -> LiveResource {
    LiveResource {
        id: model.id,
        active: model.active,
        last_used_at: model.last_used_at.map(|t| t.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

/// SeaORM store for counters, subscriptions, and live resources.
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the tables if they do not exist.
    pub async fn create_schema(&self) -> Result<()> {
        for sql in SCHEMA_SQL {
            self.db
                .execute(Statement::from_string(DbBackend::Postgres, sql))
                .await?;
        }
        Ok(())
    }

    /// Delete counter rows whose expiry hint has passed.
    pub async fn purge_expired_counters(&self) -> Result<u64> {
        let result = self
            .db
            .execute(Statement::from_string(DbBackend::Postgres, PURGE_EXPIRED_SQL))
            .await?;
        let removed = result.rows_affected();
        tracing::debug!(target: "tiergate::metering", removed, "Purged expired counters");
        Ok(removed)
    }

    /// Register a live resource row.
    pub async fn insert_live_resource(
        &self,
        subject_id: &str,
        kind: ResourceKind,
        resource: &LiveResource,
    ) -> Result<()> {
        let model = live_resource::ActiveModel {
            id: Set(resource.id.clone()),
            subject_id: Set(subject_id.to_string()),
            kind: Set(kind.as_str().to_string()),
            active: Set(resource.active),
            last_used_at: Set(resource.last_used_at.map(|t| t.fixed_offset())),
            created_at: Set(resource.created_at.fixed_offset()),
        };
        live_resource::Entity::insert(model).exec(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for SeaOrmStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        limit: Limit,
        ttl_hint: Option<Duration>,
    ) -> Result<CounterOutcome> {
        // The upsert inserts count = 1 on a missing row, so a zero ceiling
        // has to be answered before it runs.
        if limit == Limit::Finite(0) {
            return Ok(CounterOutcome::denied(self.current_count(key).await?));
        }

        let expires_at = ttl_hint
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| (Utc::now() + ttl).fixed_offset());

        let stmt = match limit {
            Limit::Unlimited => Statement::from_sql_and_values(
                DbBackend::Postgres,
                INCREMENT_UNLIMITED_SQL,
                [
                    key.subject_id.clone().into(),
                    key.counter.clone().into(),
                    key.period.as_str().into(),
                    expires_at.into(),
                ],
            ),
            Limit::Finite(max) => Statement::from_sql_and_values(
                DbBackend::Postgres,
                INCREMENT_WITHIN_LIMIT_SQL,
                [
                    key.subject_id.clone().into(),
                    key.counter.clone().into(),
                    key.period.as_str().into(),
                    expires_at.into(),
                    u64_to_i64(max).into(),
                ],
            ),
        };

        match self.db.query_one(stmt).await? {
            Some(row) => {
                let count: i64 = row.try_get("", "count")?;
                Ok(CounterOutcome::allowed(i64_to_u64(count)))
            }
            // The WHERE clause rejected the update: the row is at its ceiling.
            None => Ok(CounterOutcome::denied(self.current_count(key).await?)),
        }
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            SELECT_COUNT_SQL,
            [
                key.subject_id.clone().into(),
                key.counter.clone().into(),
                key.period.as_str().into(),
            ],
        );

        match self.db.query_one(stmt).await? {
            Some(row) => {
                let count: i64 = row.try_get("", "count")?;
                Ok(i64_to_u64(count))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl SubscriptionStore for SeaOrmStore {
    async fn get_subscription(&self, subject_id: &str) -> Result<Option<Subscription>> {
        tracing::debug!(subject_id = %subject_id, "fetching subscription");

        subscription::Entity::find_by_id(subject_id)
            .one(&self.db)
            .await?
            .map(model_to_subscription)
            .transpose()
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        let model = subscription::ActiveModel {
            subject_id: Set(sub.subject_id.clone()),
            plan_id: Set(sub.plan_id.clone()),
            status: Set(sub.status.as_str().to_string()),
            cycle_anchor: Set(sub.cycle_anchor),
            updated_at: Set(sub.updated_at.fixed_offset()),
        };

        subscription::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscription::Column::SubjectId)
                    .update_columns([
                        subscription::Column::PlanId,
                        subscription::Column::Status,
                        subscription::Column::CycleAnchor,
                        subscription::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ResourceStore for SeaOrmStore {
    async fn list_active(&self, subject_id: &str, kind: ResourceKind) -> Result<Vec<LiveResource>> {
        let rows = live_resource::Entity::find()
            .filter(live_resource::Column::SubjectId.eq(subject_id))
            .filter(live_resource::Column::Kind.eq(kind.as_str()))
            .filter(live_resource::Column::Active.eq(true))
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(model_to_live_resource).collect())
    }

    async fn count_active(&self, subject_id: &str, kind: ResourceKind) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        let count = live_resource::Entity::find()
            .filter(live_resource::Column::SubjectId.eq(subject_id))
            .filter(live_resource::Column::Kind.eq(kind.as_str()))
            .filter(live_resource::Column::Active.eq(true))
            .count(&self.db)
            .await?;

        Ok(count)
    }

    async fn deactivate(
        &self,
        subject_id: &str,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin().await?;

        // Lock the still-active rows so a concurrent executor sees them as
        // already handled once this commits.
        let to_change: Vec<String> = live_resource::Entity::find()
            .select_only()
            .column(live_resource::Column::Id)
            .filter(live_resource::Column::SubjectId.eq(subject_id))
            .filter(live_resource::Column::Kind.eq(kind.as_str()))
            .filter(live_resource::Column::Active.eq(true))
            .filter(live_resource::Column::Id.is_in(ids.iter().cloned()))
            .lock_exclusive()
            .into_tuple()
            .all(&txn)
            .await?;

        if !to_change.is_empty() {
            live_resource::Entity::update_many()
                .col_expr(live_resource::Column::Active, Expr::value(false))
                .filter(live_resource::Column::Id.is_in(to_change.iter().cloned()))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;

        if to_change.len() != ids.len() {
            tracing::debug!(
                target: "tiergate::downgrade",
                subject_id = %subject_id,
                kind = %kind,
                requested = ids.len(),
                deactivated = to_change.len(),
                "Skipped rows that were already inactive"
            );
        }

        Ok(to_change)
    }
}
