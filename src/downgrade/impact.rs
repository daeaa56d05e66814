use serde::Serialize;

use crate::error::Result;
use crate::plans::{Capability, Limit, Plan, Resource, ResourceClass};
use crate::storage::{
    Enforcement, LiveResource, ResourceKind, ResourceStore, least_recently_used_first,
};

/// Something the subject loses or must give up by moving down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DowngradeWarning {
    CapabilityLost {
        capability: Capability,
    },
    LimitReduced {
        resource: Resource,
        from: Limit,
        to: Limit,
    },
    /// Team members are enforced at access time, so overflow is only reported.
    MembersOverLimit {
        active: u64,
        limit: u64,
        excess: u64,
    },
}

impl DowngradeWarning {
    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::CapabilityLost { capability } => {
                format!("{} will no longer be available", capability.label())
            }
            Self::LimitReduced { resource, to, .. } => match resource.class() {
                ResourceClass::Metered => {
                    format!("{} will be limited to {} per period", resource.label(), to)
                }
                ResourceClass::Live => format!("{} will be limited to {}", resource.label(), to),
            },
            Self::MembersOverLimit {
                active,
                limit,
                excess,
            } => format!(
                "{} of your {} team members will lose access (new limit {})",
                excess, active, limit
            ),
        }
    }
}

/// A cascading side effect the downgrade will perform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DowngradeAction {
    #[serde(rename = "type")]
    pub action_type: &'static str,
    #[serde(skip)]
    pub kind: ResourceKind,
    pub count: u64,
    /// Rows that would be deactivated, least recently used first.
    pub resource_ids: Vec<String>,
}

impl DowngradeAction {
    pub(crate) fn deactivate(kind: ResourceKind, resource_ids: Vec<String>) -> Self {
        Self {
            action_type: deactivation_type(kind),
            kind,
            count: resource_ids.len() as u64,
            resource_ids,
        }
    }
}

pub(crate) fn deactivation_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Workspace => "deactivate_workspaces",
        ResourceKind::TeamMember => "deactivate_team_members",
    }
}

/// Read-only preview of a downgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DowngradeImpact {
    pub subject_id: String,
    pub from_plan: String,
    pub to_plan: String,
    pub warnings: Vec<DowngradeWarning>,
    pub actions: Vec<DowngradeAction>,
}

impl DowngradeImpact {
    /// Nothing is lost and nothing will be deactivated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.actions.is_empty()
    }

    /// Total rows the downgrade would deactivate.
    #[must_use]
    pub fn deactivation_count(&self) -> u64 {
        self.actions.iter().map(|a| a.count).sum()
    }
}

/// Active rows of `kind` beyond `limit`, least recently used first.
///
/// An unlimited limit returns without touching the store.
pub(crate) async fn excess_rows<R: ResourceStore>(
    resources: &R,
    subject_id: &str,
    kind: ResourceKind,
    limit: Limit,
) -> Result<(u64, Vec<LiveResource>)> {
    if limit.is_unlimited() {
        return Ok((0, Vec::new()));
    }
    let mut active = resources.list_active(subject_id, kind).await?;
    let total = active.len() as u64;
    let excess = limit.excess(total);
    active.sort_by(least_recently_used_first);
    active.truncate(usize::try_from(excess).unwrap_or(usize::MAX));
    Ok((total, active))
}

/// Compute what moving `subject_id` from `from` to `to` would cost.
///
/// Reads live counts but changes nothing. Repeated calls against unchanged
/// state return identical results.
pub async fn plan_downgrade_impact<R: ResourceStore>(
    resources: &R,
    subject_id: &str,
    from: &Plan,
    to: &Plan,
) -> Result<DowngradeImpact> {
    let mut warnings = Vec::new();
    let mut actions = Vec::new();

    for capability in Capability::ALL {
        if from.has_capability(capability) && !to.has_capability(capability) {
            warnings.push(DowngradeWarning::CapabilityLost { capability });
        }
    }

    // Live resources are reported here too, whether or not they overflow
    for resource in Resource::ALL {
        let (old, new) = (from.limit_for(resource), to.limit_for(resource));
        if !new.is_unlimited() && old > new {
            warnings.push(DowngradeWarning::LimitReduced {
                resource,
                from: old,
                to: new,
            });
        }
    }

    for kind in ResourceKind::ALL {
        let limit = to.limit_for(kind.resource());
        let (active, excess) = excess_rows(resources, subject_id, kind, limit).await?;
        if excess.is_empty() {
            continue;
        }
        match kind.enforcement() {
            Enforcement::Deactivate => {
                let ids = excess.into_iter().map(|r| r.id).collect();
                actions.push(DowngradeAction::deactivate(kind, ids));
            }
            Enforcement::Lazy => {
                warnings.push(DowngradeWarning::MembersOverLimit {
                    active,
                    limit: limit.finite().unwrap_or(active),
                    excess: excess.len() as u64,
                });
            }
        }
    }

    Ok(DowngradeImpact {
        subject_id: subject_id.to_string(),
        from_plan: from.id.clone(),
        to_plan: to.id.clone(),
        warnings,
        actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{PlanCatalog, PlanLimits};
    use crate::storage::test::InMemoryResourceStore;
    use chrono::{TimeZone, Utc};

    fn seed_workspaces(store: &InMemoryResourceStore, n: u32) {
        for i in 0..n {
            let created = Utc.with_ymd_and_hms(2025, 6, 1 + i, 0, 0, 0).unwrap();
            let used = Utc.with_ymd_and_hms(2026, 1, 1 + i, 0, 0, 0).unwrap();
            store.insert(
                "shop_1",
                ResourceKind::Workspace,
                LiveResource::new(format!("ws_{}", i), created).last_used(used),
            );
        }
    }

    #[tokio::test]
    async fn test_pro_to_free_impact() {
        let catalog = PlanCatalog::standard();
        let store = InMemoryResourceStore::new();
        seed_workspaces(&store, 8);

        let impact = plan_downgrade_impact(
            &store,
            "shop_1",
            catalog.get("pro").unwrap(),
            catalog.get("free").unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(impact.actions.len(), 1);
        let action = &impact.actions[0];
        assert_eq!(action.action_type, "deactivate_workspaces");
        assert_eq!(action.count, 7);
        // ws_7 is the most recently used and survives
        assert!(!action.resource_ids.contains(&"ws_7".to_string()));
        assert_eq!(action.resource_ids[0], "ws_0");

        let lost: Vec<_> = impact
            .warnings
            .iter()
            .filter(|w| matches!(w, DowngradeWarning::CapabilityLost { .. }))
            .collect();
        assert_eq!(lost.len(), 3);

        assert!(impact.warnings.contains(&DowngradeWarning::LimitReduced {
            resource: Resource::ThemeAnalysis,
            from: Limit::Finite(250),
            to: Limit::Finite(5),
        }));
    }

    #[tokio::test]
    async fn test_agency_to_pro_reports_reductions_from_unlimited() {
        let catalog = PlanCatalog::standard();
        let store = InMemoryResourceStore::new();

        let impact = plan_downgrade_impact(
            &store,
            "shop_1",
            catalog.get("agency").unwrap(),
            catalog.get("pro").unwrap(),
        )
        .await
        .unwrap();

        let reduced = impact
            .warnings
            .iter()
            .filter(|w| matches!(w, DowngradeWarning::LimitReduced { from: Limit::Unlimited, .. }))
            .count();
        assert_eq!(reduced, Resource::ALL.len());
        assert!(impact.actions.is_empty());
    }

    #[tokio::test]
    async fn test_member_overflow_is_warning_not_action() {
        let catalog = PlanCatalog::standard();
        let store = InMemoryResourceStore::new();
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        for i in 0..4 {
            store.insert(
                "shop_1",
                ResourceKind::TeamMember,
                LiveResource::new(format!("m_{}", i), created),
            );
        }

        let impact = plan_downgrade_impact(
            &store,
            "shop_1",
            catalog.get("pro").unwrap(),
            catalog.get("starter").unwrap(),
        )
        .await
        .unwrap();

        assert!(impact.actions.is_empty());
        assert!(impact.warnings.contains(&DowngradeWarning::MembersOverLimit {
            active: 4,
            limit: 3,
            excess: 1,
        }));
    }

    #[tokio::test]
    async fn test_preview_is_repeatable_and_read_only() {
        let catalog = PlanCatalog::standard();
        let store = InMemoryResourceStore::new();
        seed_workspaces(&store, 5);
        let (pro, free) = (catalog.get("pro").unwrap(), catalog.get("free").unwrap());

        let first = plan_downgrade_impact(&store, "shop_1", pro, free).await.unwrap();
        let second = plan_downgrade_impact(&store, "shop_1", pro, free).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_active("shop_1", ResourceKind::Workspace).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_live_limits_reduced_within_capacity() {
        let catalog = PlanCatalog::standard();
        let store = InMemoryResourceStore::new();
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        store.insert("shop_1", ResourceKind::Workspace, LiveResource::new("ws_0", created));
        store.insert("shop_1", ResourceKind::TeamMember, LiveResource::new("m_0", created));

        let impact = plan_downgrade_impact(
            &store,
            "shop_1",
            catalog.get("pro").unwrap(),
            catalog.get("free").unwrap(),
        )
        .await
        .unwrap();

        assert!(impact.actions.is_empty());
        assert!(impact.warnings.contains(&DowngradeWarning::LimitReduced {
            resource: Resource::Workspaces,
            from: Limit::Finite(10),
            to: Limit::Finite(1),
        }));
        assert!(impact.warnings.contains(&DowngradeWarning::LimitReduced {
            resource: Resource::TeamMembers,
            from: Limit::Finite(10),
            to: Limit::Finite(1),
        }));
        assert!(!impact
            .warnings
            .iter()
            .any(|w| matches!(w, DowngradeWarning::MembersOverLimit { .. })));
    }

    #[tokio::test]
    async fn test_no_warnings_when_target_unlimited() {
        let unlimited = PlanCatalog::builder()
            .plan("base")
            .limits(PlanLimits::unlimited())
            .done()
            .plan("plus")
            .limits(PlanLimits::unlimited())
            .done()
            .build()
            .unwrap();
        let store = InMemoryResourceStore::new();
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        store.insert("shop_1", ResourceKind::Workspace, LiveResource::new("ws_0", created));

        let impact = plan_downgrade_impact(
            &store,
            "shop_1",
            unlimited.get("plus").unwrap(),
            unlimited.get("base").unwrap(),
        )
        .await
        .unwrap();
        assert!(impact.is_empty());
    }

    #[test]
    fn test_live_limit_message_has_no_period() {
        let w = DowngradeWarning::LimitReduced {
            resource: Resource::Workspaces,
            from: Limit::Finite(10),
            to: Limit::Finite(1),
        };
        assert!(!w.message().contains("per period"));
    }

    #[test]
    fn test_action_serializes_with_type() {
        let action = DowngradeAction::deactivate(
            ResourceKind::Workspace,
            vec!["ws_1".to_string()],
        );
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "deactivate_workspaces");
        assert_eq!(json["count"], 1);
    }

    #[test]
    fn test_warning_messages() {
        let w = DowngradeWarning::CapabilityLost {
            capability: Capability::ApiAccess,
        };
        assert_eq!(w.message(), "API access will no longer be available");
    }
}
