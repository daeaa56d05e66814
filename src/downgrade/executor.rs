use std::sync::Arc;

use serde::Serialize;

use super::impact::{DowngradeAction, DowngradeWarning, deactivation_type, excess_rows};
use crate::audit::{AuditEvent, AuditLogger, NoOpAuditLogger};
use crate::error::{Result, TiergateError};
use crate::metering::{Clock, SystemClock};
use crate::plans::{Plan, PlanCatalog};
use crate::storage::{Enforcement, ResourceKind, ResourceStore, SubscriptionStore};

/// Result of one per-resource-type step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub kind: ResourceKind,
    /// Active rows when the step started.
    pub active_before: u64,
    /// Rows over the limit when the step started.
    pub excess: u64,
    /// Rows this step actually deactivated.
    pub deactivated: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(kind: ResourceKind, error: &TiergateError) -> Self {
        Self {
            kind,
            active_before: 0,
            excess: 0,
            deactivated: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// What `execute_downgrade` did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DowngradeReport {
    pub subject_id: String,
    pub from_plan: String,
    pub to_plan: String,
    pub steps: Vec<StepOutcome>,
    pub warnings: Vec<DowngradeWarning>,
    /// Whether the subscription now points at `to_plan`.
    pub plan_committed: bool,
}

impl DowngradeReport {
    /// Deactivations performed, one entry per resource type that changed.
    #[must_use]
    pub fn actions_taken(&self) -> Vec<DowngradeAction> {
        self.steps
            .iter()
            .filter(|s| !s.deactivated.is_empty())
            .map(|s| DowngradeAction::deactivate(s.kind, s.deactivated.clone()))
            .collect()
    }

    #[must_use]
    pub fn failed_steps(&self) -> Vec<&StepOutcome> {
        self.steps.iter().filter(|s| !s.is_success()).collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.plan_committed && self.steps.iter().all(StepOutcome::is_success)
    }
}

/// Applies a downgrade's cascading side effects, then commits the new plan.
///
/// Each step recomputes its excess from current live counts, so running the
/// executor again after a partial failure (or after success) converges
/// without deactivating anything twice. The subscription is written last and
/// only when every step succeeded.
pub struct DowngradeExecutor<R, S, A = NoOpAuditLogger> {
    catalog: Arc<PlanCatalog>,
    resources: R,
    subscriptions: S,
    audit: A,
    clock: Arc<dyn Clock>,
}

impl<R: ResourceStore, S: SubscriptionStore> DowngradeExecutor<R, S> {
    #[must_use]
    pub fn new(catalog: Arc<PlanCatalog>, resources: R, subscriptions: S) -> Self {
        Self {
            catalog,
            resources,
            subscriptions,
            audit: NoOpAuditLogger,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<R: ResourceStore, S: SubscriptionStore, A: AuditLogger> DowngradeExecutor<R, S, A> {
    /// Replace the audit logger.
    #[must_use]
    pub fn with_audit_logger<B: AuditLogger>(self, audit: B) -> DowngradeExecutor<R, S, B> {
        DowngradeExecutor {
            catalog: self.catalog,
            resources: self.resources,
            subscriptions: self.subscriptions,
            audit,
            clock: self.clock,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn resources(&self) -> &R {
        &self.resources
    }

    pub fn subscriptions(&self) -> &S {
        &self.subscriptions
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Move `subject_id` down to `to_plan_id`.
    ///
    /// Running this when the subject is already on `to_plan_id` re-applies
    /// the limits (deactivating anything that crept over) and commits nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` without a subscription, `Configuration` for unknown plans,
    /// `BadRequest` if `to_plan_id` ranks above the current plan, and any
    /// error from the final subscription write. Step failures are reported in
    /// the returned [`DowngradeReport`] instead.
    pub async fn execute_downgrade(&self, subject_id: &str, to_plan_id: &str) -> Result<DowngradeReport> {
        let subscription = self
            .subscriptions
            .get_subscription(subject_id)
            .await?
            .ok_or_else(|| TiergateError::not_found(format!("no subscription for '{}'", subject_id)))?;

        let from = self.catalog.get(&subscription.plan_id)?;
        let to = self.catalog.get(to_plan_id)?;

        if to.rank > from.rank {
            return Err(TiergateError::bad_request(format!(
                "'{}' ranks above '{}'; use an upgrade",
                to.id, from.id
            )));
        }

        let changing_plan = from.id != to.id;
        if changing_plan {
            self.audit
                .log(AuditEvent::DowngradeStarted {
                    subject_id: subject_id.to_string(),
                    from_plan: from.id.clone(),
                    to_plan: to.id.clone(),
                })
                .await;
        }

        let mut steps = Vec::with_capacity(ResourceKind::ALL.len());
        let mut warnings = Vec::new();
        for kind in ResourceKind::ALL {
            let outcome = match self.run_step(subject_id, kind, to).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        target: "tiergate::downgrade",
                        subject_id = %subject_id,
                        kind = %kind,
                        error = %e,
                        "Downgrade step failed"
                    );
                    self.audit
                        .log(AuditEvent::DowngradeStepFailed {
                            subject_id: subject_id.to_string(),
                            kind: kind.as_str().to_string(),
                            error: e.to_string(),
                        })
                        .await;
                    StepOutcome::failed(kind, &e)
                }
            };
            if kind.enforcement() == Enforcement::Lazy && outcome.excess > 0 {
                warnings.push(DowngradeWarning::MembersOverLimit {
                    active: outcome.active_before,
                    limit: outcome.active_before - outcome.excess,
                    excess: outcome.excess,
                });
            }
            steps.push(outcome);
        }

        let all_succeeded = steps.iter().all(StepOutcome::is_success);
        let plan_committed = if !all_succeeded {
            tracing::warn!(
                target: "tiergate::downgrade",
                subject_id = %subject_id,
                to_plan = %to.id,
                "Plan not committed; retry the failed steps"
            );
            false
        } else if changing_plan {
            let updated = subscription.with_plan(&to.id, self.clock.now());
            self.subscriptions.save_subscription(&updated).await?;
            self.audit
                .log(AuditEvent::PlanDowngraded {
                    subject_id: subject_id.to_string(),
                    from_plan: from.id.clone(),
                    to_plan: to.id.clone(),
                })
                .await;
            tracing::info!(
                target: "tiergate::downgrade",
                subject_id = %subject_id,
                from_plan = %from.id,
                to_plan = %to.id,
                "Downgrade committed"
            );
            true
        } else {
            true
        };

        Ok(DowngradeReport {
            subject_id: subject_id.to_string(),
            from_plan: from.id.clone(),
            to_plan: to.id.clone(),
            steps,
            warnings,
            plan_committed,
        })
    }

    /// Re-run a single resource step against `to_plan_id`'s limits.
    ///
    /// Use this to retry a step that failed; it does not commit the plan.
    pub async fn execute_step(
        &self,
        subject_id: &str,
        kind: ResourceKind,
        to_plan_id: &str,
    ) -> Result<StepOutcome> {
        let to = self.catalog.get(to_plan_id)?;
        self.run_step(subject_id, kind, to).await
    }

    async fn run_step(&self, subject_id: &str, kind: ResourceKind, to: &Plan) -> Result<StepOutcome> {
        let limit = to.limit_for(kind.resource());
        let (active_before, excess_rows) = excess_rows(&self.resources, subject_id, kind, limit).await?;
        let excess = excess_rows.len() as u64;

        let mut outcome = StepOutcome {
            kind,
            active_before,
            excess,
            deactivated: Vec::new(),
            error: None,
        };

        if excess == 0 {
            return Ok(outcome);
        }

        match kind.enforcement() {
            Enforcement::Lazy => {
                self.audit
                    .log(AuditEvent::MembersOverLimit {
                        subject_id: subject_id.to_string(),
                        active: active_before,
                        limit: active_before - excess,
                    })
                    .await;
            }
            Enforcement::Deactivate => {
                let ids: Vec<String> = excess_rows.into_iter().map(|r| r.id).collect();
                outcome.deactivated = self.resources.deactivate(subject_id, kind, &ids).await?;

                tracing::info!(
                    target: "tiergate::downgrade",
                    subject_id = %subject_id,
                    action = deactivation_type(kind),
                    requested = ids.len(),
                    deactivated = outcome.deactivated.len(),
                    "Deactivated resources over plan limit"
                );

                if !outcome.deactivated.is_empty() {
                    self.audit
                        .log(AuditEvent::ResourcesDeactivated {
                            subject_id: subject_id.to_string(),
                            kind: kind.as_str().to_string(),
                            ids: outcome.deactivated.clone(),
                        })
                        .await;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditLogger;
    use crate::storage::test::{InMemoryResourceStore, InMemorySubscriptionStore};
    use crate::storage::{LiveResource, Subscription};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn setup(
        plan: &str,
        workspaces: u32,
    ) -> DowngradeExecutor<InMemoryResourceStore, InMemorySubscriptionStore, RecordingAuditLogger> {
        let resources = InMemoryResourceStore::new();
        for i in 0..workspaces {
            let created = Utc.with_ymd_and_hms(2025, 1, 1 + i, 0, 0, 0).unwrap();
            resources.insert(
                "shop_1",
                ResourceKind::Workspace,
                LiveResource::new(format!("ws_{}", i), created),
            );
        }
        let subscriptions = InMemorySubscriptionStore::new();
        subscriptions.insert(Subscription::new(
            "shop_1",
            plan,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        ));
        DowngradeExecutor::new(Arc::new(PlanCatalog::standard()), resources, subscriptions)
            .with_audit_logger(RecordingAuditLogger::new())
    }

    #[tokio::test]
    async fn test_execute_deactivates_excess_and_commits_last() {
        let executor = setup("starter", 3);
        let report = executor.execute_downgrade("shop_1", "free").await.unwrap();

        assert!(report.is_complete());
        let actions = report.actions_taken();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].count, 2);
        // Never-used rows tie on last use and fall back to creation order
        assert_eq!(actions[0].resource_ids, vec!["ws_0".to_string(), "ws_1".to_string()]);

        let sub = executor.subscriptions().get_subscription("shop_1").await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "free");

        assert_eq!(
            executor.audit().kinds().await,
            vec!["downgrade_started", "resources_deactivated", "plan_downgraded"]
        );
    }

    #[tokio::test]
    async fn test_rejects_upgrade() {
        let executor = setup("free", 0);
        let err = executor.execute_downgrade("shop_1", "pro").await.unwrap_err();
        assert!(matches!(err, TiergateError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_subscription() {
        let executor = setup("pro", 0);
        let err = executor.execute_downgrade("shop_unknown", "free").await.unwrap_err();
        assert!(matches!(err, TiergateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_step_blocks_commit_and_retry_converges() {
        let executor = setup("pro", 4);
        executor.resources().set_unavailable(ResourceKind::Workspace, true);

        let report = executor.execute_downgrade("shop_1", "free").await.unwrap();
        assert!(!report.plan_committed);
        assert_eq!(report.failed_steps().len(), 1);
        assert_eq!(executor.subscriptions().save_count(), 0);
        let sub = executor.subscriptions().get_subscription("shop_1").await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "pro");

        executor.resources().set_unavailable(ResourceKind::Workspace, false);
        let step = executor
            .execute_step("shop_1", ResourceKind::Workspace, "free")
            .await
            .unwrap();
        assert_eq!(step.deactivated.len(), 3);

        let report = executor.execute_downgrade("shop_1", "free").await.unwrap();
        assert!(report.is_complete());
        assert!(report.actions_taken().is_empty());
        assert_eq!(executor.subscriptions().save_count(), 1);
    }

    #[tokio::test]
    async fn test_member_overflow_left_in_place() {
        let executor = setup("pro", 0);
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            executor.resources().insert(
                "shop_1",
                ResourceKind::TeamMember,
                LiveResource::new(format!("m_{}", i), created),
            );
        }

        let report = executor.execute_downgrade("shop_1", "free").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(
            executor
                .resources()
                .count_active("shop_1", ResourceKind::TeamMember)
                .await
                .unwrap(),
            5
        );
        assert!(report.warnings.contains(&DowngradeWarning::MembersOverLimit {
            active: 5,
            limit: 1,
            excess: 4,
        }));
    }
}
