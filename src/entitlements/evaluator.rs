use std::sync::Arc;

use super::decision::{Action, Decision, UpgradeSuggestion, UsageSnapshot};
use crate::error::{Result, TiergateError};
use crate::metering::{CounterStore, FailurePolicy, UsageMeter};
use crate::plans::{Capability, Limit, Plan, PlanCatalog, Requirement, Resource, ResourceClass};
use crate::storage::{
    ResourceKind, ResourceStore, SubscriptionStore, least_recently_used_first,
};

/// Decides whether a plan allows an action given live usage.
///
/// Capability checks are pure. Metered actions go through the atomic
/// counter. Live-resource creation counts active rows.
pub struct EntitlementEvaluator<C, R> {
    catalog: Arc<PlanCatalog>,
    meter: UsageMeter<C>,
    resources: R,
}

impl<C: CounterStore, R: ResourceStore> EntitlementEvaluator<C, R> {
    #[must_use]
    pub fn new(catalog: Arc<PlanCatalog>, meter: UsageMeter<C>, resources: R) -> Self {
        Self {
            catalog,
            meter,
            resources,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn meter(&self) -> &UsageMeter<C> {
        &self.meter
    }

    /// Check `action` for `subject_id` on `plan_id`, consuming quota if allowed.
    ///
    /// # Errors
    ///
    /// `Configuration` for an unknown plan or a metered/live mix-up. Store
    /// unavailability is resolved by the failure policy instead.
    pub async fn can_perform(&self, plan_id: &str, action: Action, subject_id: &str) -> Result<Decision> {
        let plan = self.catalog.get(plan_id)?;
        let decision = match action {
            Action::Use(capability) => self.check_capability(plan, capability),
            Action::Consume(resource) => {
                self.check_metered(plan, resource, subject_id, true).await?
            }
            Action::Create(kind) => self.check_live(plan, kind, subject_id).await?,
        };
        log_decision(subject_id, plan, action, &decision);
        Ok(decision)
    }

    /// Same as [`can_perform`](Self::can_perform), but never increments a counter.
    pub async fn preview(&self, plan_id: &str, action: Action, subject_id: &str) -> Result<Decision> {
        let plan = self.catalog.get(plan_id)?;
        match action {
            Action::Use(capability) => Ok(self.check_capability(plan, capability)),
            Action::Consume(resource) => self.check_metered(plan, resource, subject_id, false).await,
            Action::Create(kind) => self.check_live(plan, kind, subject_id).await,
        }
    }

    /// Resolve the subject's plan from its subscription, then check `action`.
    ///
    /// A subject without an active (or trialing) subscription is evaluated
    /// against the lowest tier.
    pub async fn can_perform_for<S: SubscriptionStore>(
        &self,
        subscriptions: &S,
        action: Action,
        subject_id: &str,
    ) -> Result<Decision> {
        let plan_id = match subscriptions.get_subscription(subject_id).await? {
            Some(sub) if sub.is_active() => sub.plan_id,
            _ => self
                .catalog
                .lowest()
                .map(|p| p.id.clone())
                .ok_or_else(|| TiergateError::configuration("catalog has no plans"))?,
        };
        self.can_perform(&plan_id, action, subject_id).await
    }

    /// Lazy team-member enforcement.
    ///
    /// Active members are ranked most-recently-used first; only the first
    /// `limit` of them pass. Members over the limit keep their rows.
    pub async fn check_member_access(
        &self,
        plan_id: &str,
        subject_id: &str,
        member_id: &str,
    ) -> Result<Decision> {
        let plan = self.catalog.get(plan_id)?;
        let kind = ResourceKind::TeamMember;
        let resource = kind.resource();
        let limit = plan.limit_for(resource);

        let mut members = match self.resources.list_active(subject_id, kind).await {
            Ok(members) => members,
            Err(e) if e.is_store_unavailable() => return Ok(self.unavailable_decision(&e)),
            Err(e) => return Err(e),
        };

        let usage = UsageSnapshot {
            resource,
            used: members.len() as u64,
            limit,
            period: None,
        };

        members.sort_by(|a, b| least_recently_used_first(b, a));
        let Some(rank) = members.iter().position(|m| m.id == member_id) else {
            return Ok(Decision::deny(format!("'{}' is not an active team member", member_id))
                .with_usage(usage));
        };

        let within = match limit {
            Limit::Unlimited => true,
            Limit::Finite(max) => (rank as u64) < max,
        };

        if within {
            return Ok(Decision::allow().with_usage(usage));
        }

        tracing::info!(
            target: "tiergate::entitlements",
            subject_id = %subject_id,
            member_id = %member_id,
            plan_id = %plan.id,
            active = usage.used,
            limit = %limit,
            "Team member over plan limit"
        );

        Ok(Decision::deny(format!(
            "The {} plan includes {} team members; this seat is over the limit",
            plan.display_name, limit
        ))
        .with_usage(usage)
        .with_suggestion(self.suggest_limit_upgrade(plan, resource)))
    }

    fn check_capability(&self, plan: &Plan, capability: Capability) -> Decision {
        if plan.has_capability(capability) {
            return Decision::allow();
        }
        let suggestion = self
            .catalog
            .cheapest_plan_with(Requirement::Capability(capability))
            .map(|p| UpgradeSuggestion::from_plan(p, None));
        Decision::deny(format!(
            "{} is not available on the {} plan",
            capability.label(),
            plan.display_name
        ))
        .with_suggestion(suggestion)
    }

    async fn check_metered(
        &self,
        plan: &Plan,
        resource: Resource,
        subject_id: &str,
        consume: bool,
    ) -> Result<Decision> {
        if resource.class() != ResourceClass::Metered {
            return Err(TiergateError::configuration(format!(
                "{} is a live resource; check it with Action::Create",
                resource
            )));
        }
        let limit = plan.limit_for(resource);

        let (allowed, used, period, degraded) = if consume {
            let metered = self.meter.check_and_increment(subject_id, resource, limit).await?;
            (metered.allowed, metered.count, metered.period, metered.degraded)
        } else {
            let period = self.meter.key_for(subject_id, resource).period;
            match self.meter.current(subject_id, resource).await {
                Ok(used) => (limit.admits_one_more(used), used, period, false),
                Err(e) if e.is_store_unavailable() => {
                    let allowed = self.meter.failure_policy() == FailurePolicy::Open;
                    (allowed, 0, period, true)
                }
                Err(e) => return Err(e),
            }
        };

        let usage = UsageSnapshot {
            resource,
            used,
            limit,
            period: Some(period),
        };

        if allowed {
            let decision = Decision::allow().with_usage(usage);
            return Ok(if degraded { decision.degraded() } else { decision });
        }

        if degraded {
            return Ok(Decision::deny(format!(
                "Usage of {} could not be verified; try again shortly",
                resource.label()
            ))
            .with_usage(usage)
            .degraded());
        }

        Ok(Decision::deny(quota_reason(plan, resource, limit, used))
            .with_usage(usage)
            .with_suggestion(self.suggest_limit_upgrade(plan, resource)))
    }

    async fn check_live(&self, plan: &Plan, kind: ResourceKind, subject_id: &str) -> Result<Decision> {
        let resource = kind.resource();
        let limit = plan.limit_for(resource);

        // Unlimited short-circuits before touching the store.
        if limit.is_unlimited() {
            return Ok(Decision::allow());
        }

        let active = match self.resources.count_active(subject_id, kind).await {
            Ok(n) => n,
            Err(e) if e.is_store_unavailable() => return Ok(self.unavailable_decision(&e)),
            Err(e) => return Err(e),
        };

        let usage = UsageSnapshot {
            resource,
            used: active,
            limit,
            period: None,
        };

        if limit.admits_one_more(active) {
            return Ok(Decision::allow().with_usage(usage));
        }

        Ok(Decision::deny(format!(
            "The {} plan allows {} {}; you have {} active",
            plan.display_name,
            limit,
            resource.label(),
            active
        ))
        .with_usage(usage)
        .with_suggestion(self.suggest_limit_upgrade(plan, resource)))
    }

    fn suggest_limit_upgrade(&self, plan: &Plan, resource: Resource) -> Option<UpgradeSuggestion> {
        self.catalog
            .upgrade_from(
                plan,
                Requirement::LimitAbove {
                    resource,
                    current: plan.limit_for(resource),
                },
            )
            .map(|p| UpgradeSuggestion::from_plan(p, Some(resource)))
    }

    fn unavailable_decision(&self, error: &TiergateError) -> Decision {
        let policy = self.meter.failure_policy();
        tracing::warn!(
            target: "tiergate::entitlements",
            policy = policy.as_str(),
            error = %error,
            "Resource store unavailable, applying failure policy"
        );
        match policy {
            FailurePolicy::Open => Decision::allow().degraded(),
            FailurePolicy::Closed => {
                Decision::deny("Usage could not be verified; try again shortly").degraded()
            }
        }
    }
}

fn quota_reason(plan: &Plan, resource: Resource, limit: Limit, used: u64) -> String {
    match limit {
        Limit::Finite(0) => format!(
            "{} are not included in the {} plan",
            capitalize(resource.label()),
            plan.display_name
        ),
        _ => format!(
            "You have used {} of {} {} this period on the {} plan",
            used,
            limit,
            resource.label(),
            plan.display_name
        ),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn log_decision(subject_id: &str, plan: &Plan, action: Action, decision: &Decision) {
    if decision.allowed {
        tracing::debug!(
            target: "tiergate::entitlements",
            subject_id = %subject_id,
            plan_id = %plan.id,
            action = ?action,
            degraded = decision.degraded,
            "Action allowed"
        );
    } else {
        tracing::info!(
            target: "tiergate::entitlements",
            subject_id = %subject_id,
            plan_id = %plan.id,
            action = ?action,
            degraded = decision.degraded,
            suggestion = decision
                .upgrade_suggestion
                .as_ref()
                .map(|s| s.plan_id.as_str())
                .unwrap_or("none"),
            "Action denied"
        );
    }
}
