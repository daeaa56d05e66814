//! Ordered tier definitions.

use std::cmp::Ordering;
use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::limits::{Capability, Limit, Resource};
use crate::error::{Result, TiergateError};

/// Numeric limits of a plan, one field per [`Resource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub theme_analysis: Limit,
    pub performance_audit: Limit,
    pub ai_recommendation: Limit,
    pub workspaces: Limit,
    pub team_members: Limit,
}

impl PlanLimits {
    /// Every resource unlimited.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::uniform(Limit::Unlimited)
    }

    /// Every resource at zero.
    #[must_use]
    pub fn none() -> Self {
        Self::uniform(Limit::Finite(0))
    }

    fn uniform(limit: Limit) -> Self {
        Self {
            theme_analysis: limit,
            performance_audit: limit,
            ai_recommendation: limit,
            workspaces: limit,
            team_members: limit,
        }
    }

    #[must_use]
    pub fn get(&self, resource: Resource) -> Limit {
        match resource {
            Resource::ThemeAnalysis => self.theme_analysis,
            Resource::PerformanceAudit => self.performance_audit,
            Resource::AiRecommendation => self.ai_recommendation,
            Resource::Workspaces => self.workspaces,
            Resource::TeamMembers => self.team_members,
        }
    }

    pub fn set(&mut self, resource: Resource, limit: Limit) {
        let slot = match resource {
            Resource::ThemeAnalysis => &mut self.theme_analysis,
            Resource::PerformanceAudit => &mut self.performance_audit,
            Resource::AiRecommendation => &mut self.ai_recommendation,
            Resource::Workspaces => &mut self.workspaces,
            Resource::TeamMembers => &mut self.team_members,
        };
        *slot = limit;
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self::none()
    }
}

/// Boolean capability flags of a plan, one field per [`Capability`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCapabilities {
    pub advanced_export: bool,
    pub scheduled_scans: bool,
    pub api_access: bool,
    pub priority_support: bool,
    pub white_label_reports: bool,
}

impl PlanCapabilities {
    #[must_use]
    pub fn get(&self, capability: Capability) -> bool {
        match capability {
            Capability::AdvancedExport => self.advanced_export,
            Capability::ScheduledScans => self.scheduled_scans,
            Capability::ApiAccess => self.api_access,
            Capability::PrioritySupport => self.priority_support,
            Capability::WhiteLabelReports => self.white_label_reports,
        }
    }

    pub fn set(&mut self, capability: Capability, enabled: bool) {
        let slot = match capability {
            Capability::AdvancedExport => &mut self.advanced_export,
            Capability::ScheduledScans => &mut self.scheduled_scans,
            Capability::ApiAccess => &mut self.api_access,
            Capability::PrioritySupport => &mut self.priority_support,
            Capability::WhiteLabelReports => &mut self.white_label_reports,
        };
        *slot = enabled;
    }

    /// Capabilities switched on.
    pub fn enabled(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.get(*c))
    }
}

/// A subscription tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier (e.g. "starter").
    pub id: String,
    /// Position in the hierarchy. Higher rank means at least as capable.
    pub rank: u32,
    /// Price per billing cycle.
    pub price: Decimal,
    #[serde(default)]
    pub trial_days: Option<u32>,
    pub display_name: String,
    pub limits: PlanLimits,
    #[serde(default)]
    pub capabilities: PlanCapabilities,
}

impl Plan {
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.get(capability)
    }

    #[must_use]
    pub fn limit_for(&self, resource: Resource) -> Limit {
        self.limits.get(resource)
    }

    /// Ordinal comparison by rank. Price plays no part.
    #[must_use]
    pub fn compare_rank(&self, other: &Plan) -> Ordering {
        self.rank.cmp(&other.rank)
    }

    #[must_use]
    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        match requirement {
            Requirement::Capability(c) => self.has_capability(*c),
            Requirement::LimitAbove { resource, current } => {
                self.limit_for(*resource) > *current
            }
        }
    }

    // Every limit and flag of `self` is <= the matching one of `higher`.
    fn is_dominated_by(&self, higher: &Plan) -> std::result::Result<(), String> {
        for resource in Resource::ALL {
            let (lo, hi) = (self.limit_for(resource), higher.limit_for(resource));
            if lo > hi {
                return Err(format!(
                    "{} limit {} on '{}' exceeds {} on higher-ranked '{}'",
                    resource, lo, self.id, hi, higher.id
                ));
            }
        }
        for capability in Capability::ALL {
            if self.has_capability(capability) && !higher.has_capability(capability) {
                return Err(format!(
                    "'{}' grants {} but higher-ranked '{}' does not",
                    self.id, capability, higher.id
                ));
            }
        }
        Ok(())
    }
}

/// What an upgrade has to provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Capability(Capability),
    /// A limit on `resource` strictly greater than `current`.
    LimitAbove { resource: Resource, current: Limit },
}

/// The immutable, validated set of tiers, kept in ascending rank order.
#[derive(Clone, Debug)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

#[derive(Deserialize)]
struct CatalogFile {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Validate and build a catalog.
    ///
    /// Rejects an empty catalog, duplicate ids, duplicate ranks, negative
    /// prices, and any pair of tiers where the lower rank grants more than
    /// the higher one.
    pub fn new(mut plans: Vec<Plan>) -> Result<Self> {
        if plans.is_empty() {
            return Err(TiergateError::configuration("catalog has no plans"));
        }

        let mut ids = HashSet::new();
        for plan in &plans {
            if plan.id.trim().is_empty() {
                return Err(TiergateError::configuration("plan id must not be empty"));
            }
            if !ids.insert(plan.id.as_str()) {
                return Err(TiergateError::configuration(format!(
                    "plan id '{}' appears more than once",
                    plan.id
                )));
            }
            if plan.price.is_sign_negative() {
                return Err(TiergateError::configuration(format!(
                    "plan '{}' has a negative price",
                    plan.id
                )));
            }
        }

        plans.sort_by_key(|p| p.rank);
        for pair in plans.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if lower.rank == higher.rank {
                return Err(TiergateError::configuration(format!(
                    "plans '{}' and '{}' share rank {}",
                    lower.id, higher.id, lower.rank
                )));
            }
            lower
                .is_dominated_by(higher)
                .map_err(|msg| TiergateError::configuration(format!("non-monotonic catalog: {}", msg)))?;
        }

        Ok(Self { plans })
    }

    /// Load a catalog from JSON of the form `{"plans": [...]}`.
    ///
    /// Limits use `-1` for unlimited.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.plans)
    }

    #[must_use]
    pub fn builder() -> PlanCatalogBuilder {
        PlanCatalogBuilder::default()
    }

    /// The default four-tier catalog: free, starter, pro, agency.
    #[must_use]
    pub fn standard() -> Self {
        let free = Plan {
            id: "free".to_string(),
            rank: 0,
            price: Decimal::ZERO,
            trial_days: None,
            display_name: "Free".to_string(),
            limits: PlanLimits {
                theme_analysis: Limit::Finite(5),
                performance_audit: Limit::Finite(2),
                ai_recommendation: Limit::Finite(0),
                workspaces: Limit::Finite(1),
                team_members: Limit::Finite(1),
            },
            capabilities: PlanCapabilities::default(),
        };

        let starter = Plan {
            id: "starter".to_string(),
            rank: 1,
            price: Decimal::new(2900, 2),
            trial_days: Some(14),
            display_name: "Starter".to_string(),
            limits: PlanLimits {
                theme_analysis: Limit::Finite(50),
                performance_audit: Limit::Finite(20),
                ai_recommendation: Limit::Finite(25),
                workspaces: Limit::Finite(3),
                team_members: Limit::Finite(3),
            },
            capabilities: PlanCapabilities {
                advanced_export: true,
                ..PlanCapabilities::default()
            },
        };

        let pro = Plan {
            id: "pro".to_string(),
            rank: 2,
            price: Decimal::new(7900, 2),
            trial_days: Some(14),
            display_name: "Pro".to_string(),
            limits: PlanLimits {
                theme_analysis: Limit::Finite(250),
                performance_audit: Limit::Finite(100),
                ai_recommendation: Limit::Finite(200),
                workspaces: Limit::Finite(10),
                team_members: Limit::Finite(10),
            },
            capabilities: PlanCapabilities {
                advanced_export: true,
                scheduled_scans: true,
                api_access: true,
                ..PlanCapabilities::default()
            },
        };

        let agency = Plan {
            id: "agency".to_string(),
            rank: 3,
            price: Decimal::new(19900, 2),
            trial_days: None,
            display_name: "Agency".to_string(),
            limits: PlanLimits::unlimited(),
            capabilities: PlanCapabilities {
                advanced_export: true,
                scheduled_scans: true,
                api_access: true,
                priority_support: true,
                white_label_reports: true,
            },
        };

        Self {
            plans: vec![free, starter, pro, agency],
        }
    }

    /// Get a plan by id.
    pub fn get(&self, plan_id: &str) -> Result<&Plan> {
        self.find(plan_id)
            .ok_or_else(|| TiergateError::configuration(format!("unknown plan '{}'", plan_id)))
    }

    #[must_use]
    pub fn find(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    #[must_use]
    pub fn contains(&self, plan_id: &str) -> bool {
        self.find(plan_id).is_some()
    }

    /// Plans in ascending rank order.
    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Lowest-ranked plan.
    #[must_use]
    pub fn lowest(&self) -> Option<&Plan> {
        self.plans.first()
    }

    /// Highest-ranked plan.
    #[must_use]
    pub fn highest(&self) -> Option<&Plan> {
        self.plans.last()
    }

    /// Compare two plans by rank.
    pub fn compare_rank(&self, a: &str, b: &str) -> Result<Ordering> {
        Ok(self.get(a)?.compare_rank(self.get(b)?))
    }

    pub fn has_capability(&self, plan_id: &str, capability: Capability) -> Result<bool> {
        Ok(self.get(plan_id)?.has_capability(capability))
    }

    pub fn limit_for(&self, plan_id: &str, resource: Resource) -> Result<Limit> {
        Ok(self.get(plan_id)?.limit_for(resource))
    }

    /// Lowest-ranked plan satisfying `requirement`, or `None` when even the
    /// top tier does not.
    #[must_use]
    pub fn cheapest_plan_with(&self, requirement: Requirement) -> Option<&Plan> {
        self.plans.iter().find(|p| p.satisfies(&requirement))
    }

    /// Like [`cheapest_plan_with`](Self::cheapest_plan_with), but only
    /// considers plans ranked above `current`.
    #[must_use]
    pub fn upgrade_from(&self, current: &Plan, requirement: Requirement) -> Option<&Plan> {
        self.plans
            .iter()
            .filter(|p| p.rank > current.rank)
            .find(|p| p.satisfies(&requirement))
    }
}

/// Builder for a custom [`PlanCatalog`].
///
/// ```rust
/// use rust_decimal::Decimal;
/// use tiergate::plans::{Capability, Limit, PlanCatalog, Resource};
///
/// let catalog = PlanCatalog::builder()
///     .plan("basic")
///         .price(Decimal::new(900, 2))
///         .limit(Resource::ThemeAnalysis, Limit::Finite(10))
///         .done()
///     .plan("plus")
///         .price(Decimal::new(1900, 2))
///         .limit(Resource::ThemeAnalysis, Limit::Unlimited)
///         .capability(Capability::ApiAccess)
///         .done()
///     .build()
///     .unwrap();
///
/// assert_eq!(catalog.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct PlanCatalogBuilder {
    plans: Vec<Plan>,
}

impl PlanCatalogBuilder {
    /// Start a plan. Ranks default to the order plans are added.
    #[must_use]
    pub fn plan(self, id: &str) -> PlanBuilder {
        let rank = u32::try_from(self.plans.len()).unwrap_or(u32::MAX);
        PlanBuilder {
            parent: self,
            plan: Plan {
                id: id.to_string(),
                rank,
                price: Decimal::ZERO,
                trial_days: None,
                display_name: id.to_string(),
                limits: PlanLimits::none(),
                capabilities: PlanCapabilities::default(),
            },
        }
    }

    /// Validate and build.
    pub fn build(self) -> Result<PlanCatalog> {
        PlanCatalog::new(self.plans)
    }
}

/// Builder for one plan inside a [`PlanCatalogBuilder`].
#[derive(Debug)]
pub struct PlanBuilder {
    parent: PlanCatalogBuilder,
    plan: Plan,
}

impl PlanBuilder {
    #[must_use]
    pub fn rank(mut self, rank: u32) -> Self {
        self.plan.rank = rank;
        self
    }

    #[must_use]
    pub fn price(mut self, price: Decimal) -> Self {
        self.plan.price = price;
        self
    }

    #[must_use]
    pub fn trial_days(mut self, days: u32) -> Self {
        self.plan.trial_days = Some(days);
        self
    }

    #[must_use]
    pub fn display_name(mut self, name: &str) -> Self {
        self.plan.display_name = name.to_string();
        self
    }

    #[must_use]
    pub fn limit(mut self, resource: Resource, limit: Limit) -> Self {
        self.plan.limits.set(resource, limit);
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: PlanLimits) -> Self {
        self.plan.limits = limits;
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.plan.capabilities.set(capability, true);
        self
    }

    #[must_use]
    pub fn capabilities<I>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        for c in capabilities {
            self.plan.capabilities.set(c, true);
        }
        self
    }

    /// Finish this plan and return to the catalog builder.
    #[must_use]
    pub fn done(mut self) -> PlanCatalogBuilder {
        self.parent.plans.push(self.plan);
        self.parent
    }
}
