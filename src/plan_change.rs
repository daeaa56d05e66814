//! Preview and apply a subject's move between tiers.
//!
//! Upgrades commit immediately. Downgrades need an explicit confirmation,
//! because they can deactivate workspaces, and then run through the
//! [`DowngradeExecutor`].

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::Serialize;

use crate::audit::{AuditEvent, AuditLogger};
use crate::downgrade::{DowngradeExecutor, DowngradeImpact, DowngradeReport, plan_downgrade_impact};
use crate::error::{Result, TiergateError};
use crate::proration::{BillingCycle, Proration};
use crate::storage::{ResourceStore, Subscription, SubscriptionStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Upgrade,
    Downgrade,
    Unchanged,
}

impl ChangeDirection {
    fn from_rank(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Downgrade,
            Ordering::Greater => Self::Upgrade,
            Ordering::Equal => Self::Unchanged,
        }
    }
}

/// Everything the subject should see before confirming a change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanChangePreview {
    pub subject_id: String,
    pub from_plan: String,
    pub to_plan: String,
    pub direction: ChangeDirection,
    pub cycle: BillingCycle,
    /// Present only for a change made after the first day of the cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proration: Option<Proration>,
    /// Present only for downgrades.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<DowngradeImpact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanChangeOutcome {
    pub preview: PlanChangePreview,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade: Option<DowngradeReport>,
    pub plan_committed: bool,
}

/// Orchestrates plan changes on top of a [`DowngradeExecutor`].
pub struct PlanChangeManager<R, S, A> {
    executor: DowngradeExecutor<R, S, A>,
}

impl<R: ResourceStore, S: SubscriptionStore, A: AuditLogger> PlanChangeManager<R, S, A> {
    #[must_use]
    pub fn new(executor: DowngradeExecutor<R, S, A>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &DowngradeExecutor<R, S, A> {
        &self.executor
    }

    /// Describe moving `subject_id` to `to_plan_id` on `today`. Changes nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` without a subscription, `Configuration` for unknown plans,
    /// `BadRequest` if `today` precedes the billing anchor.
    pub async fn preview_change(
        &self,
        subject_id: &str,
        to_plan_id: &str,
        today: NaiveDate,
    ) -> Result<PlanChangePreview> {
        let subscription = self.load(subject_id).await?;
        self.preview_for(&subscription, to_plan_id, today).await
    }

    /// Apply the change previewed by [`preview_change`](Self::preview_change).
    ///
    /// # Errors
    ///
    /// Everything `preview_change` returns, plus `BadRequest` for a downgrade
    /// without `confirmed` and any error from saving the subscription.
    pub async fn apply_change(
        &self,
        subject_id: &str,
        to_plan_id: &str,
        today: NaiveDate,
        confirmed: bool,
    ) -> Result<PlanChangeOutcome> {
        let subscription = self.load(subject_id).await?;
        let preview = self.preview_for(&subscription, to_plan_id, today).await?;

        match preview.direction {
            ChangeDirection::Unchanged => Ok(PlanChangeOutcome {
                preview,
                downgrade: None,
                plan_committed: false,
            }),
            ChangeDirection::Upgrade => {
                let updated = subscription.with_plan(&preview.to_plan, self.executor.clock().now());
                self.executor.subscriptions().save_subscription(&updated).await?;
                self.executor
                    .audit()
                    .log(AuditEvent::PlanUpgraded {
                        subject_id: subject_id.to_string(),
                        from_plan: preview.from_plan.clone(),
                        to_plan: preview.to_plan.clone(),
                    })
                    .await;
                tracing::info!(
                    target: "tiergate::plan_change",
                    subject_id = %subject_id,
                    from_plan = %preview.from_plan,
                    to_plan = %preview.to_plan,
                    "Plan upgraded"
                );
                Ok(PlanChangeOutcome {
                    preview,
                    downgrade: None,
                    plan_committed: true,
                })
            }
            ChangeDirection::Downgrade => {
                if !confirmed {
                    return Err(TiergateError::bad_request(format!(
                        "downgrade from '{}' to '{}' must be confirmed",
                        preview.from_plan, preview.to_plan
                    )));
                }
                let report = self.executor.execute_downgrade(subject_id, to_plan_id).await?;
                Ok(PlanChangeOutcome {
                    plan_committed: report.plan_committed,
                    preview,
                    downgrade: Some(report),
                })
            }
        }
    }

    async fn load(&self, subject_id: &str) -> Result<Subscription> {
        self.executor
            .subscriptions()
            .get_subscription(subject_id)
            .await?
            .ok_or_else(|| TiergateError::not_found(format!("no subscription for '{}'", subject_id)))
    }

    async fn preview_for(
        &self,
        subscription: &Subscription,
        to_plan_id: &str,
        today: NaiveDate,
    ) -> Result<PlanChangePreview> {
        let catalog = self.executor.catalog();
        let from = catalog.get(&subscription.plan_id)?;
        let to = catalog.get(to_plan_id)?;
        let direction = ChangeDirection::from_rank(to.compare_rank(from));

        let cycle = BillingCycle::containing(subscription.cycle_anchor, today)?;
        let proration = if direction != ChangeDirection::Unchanged && cycle.is_mid_cycle(today) {
            Some(cycle.prorate(today, from.price, to.price)?)
        } else {
            None
        };

        let impact = if direction == ChangeDirection::Downgrade {
            Some(
                plan_downgrade_impact(
                    self.executor.resources(),
                    &subscription.subject_id,
                    from,
                    to,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(PlanChangePreview {
            subject_id: subscription.subject_id.clone(),
            from_plan: from.id.clone(),
            to_plan: to.id.clone(),
            direction,
            cycle,
            proration,
            impact,
        })
    }
}
