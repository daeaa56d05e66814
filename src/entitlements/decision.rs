use std::str::FromStr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TiergateError;
use crate::metering::PeriodKey;
use crate::plans::{Capability, Limit, Plan, Resource, ResourceClass};
use crate::storage::ResourceKind;

/// Something a subject wants to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Use a capability-gated feature.
    Use(Capability),
    /// Consume one unit of a metered resource.
    Consume(Resource),
    /// Create one more live resource.
    Create(ResourceKind),
}

impl FromStr for Action {
    type Err = TiergateError;

    /// Parse a resource or capability name such as `"themeAnalysis"` or `"api_access"`.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Ok(resource) = name.parse::<Resource>() {
            return Ok(match resource.class() {
                ResourceClass::Metered => Self::Consume(resource),
                ResourceClass::Live => match ResourceKind::for_resource(resource) {
                    Some(kind) => Self::Create(kind),
                    None => Self::Consume(resource),
                },
            });
        }
        name.parse::<Capability>()
            .map(Self::Use)
            .map_err(|_| TiergateError::configuration(format!("unknown action '{}'", name)))
    }
}

/// The cheapest tier that would have allowed a denied action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSuggestion {
    pub plan_id: String,
    pub display_name: String,
    pub price: Decimal,
    /// The suggested plan's limit for the resource in question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
}

impl UpgradeSuggestion {
    pub(crate) fn from_plan(plan: &Plan, resource: Option<Resource>) -> Self {
        Self {
            plan_id: plan.id.clone(),
            display_name: plan.display_name.clone(),
            price: plan.price,
            limit: resource.map(|r| plan.limit_for(r)),
        }
    }
}

/// "X of Y" usage for a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub resource: Resource,
    pub used: u64,
    pub limit: Limit,
    /// Window for metered resources. `None` for live resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<PeriodKey>,
}

impl UsageSnapshot {
    /// Units left in the window. `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.limit.finite().map(|max| max.saturating_sub(self.used))
    }
}

/// Outcome of an entitlement check.
///
/// A denial is a normal value, not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_suggestion: Option<UpgradeSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
    /// The store was unavailable and the failure policy decided.
    #[serde(default)]
    pub degraded: bool,
}

impl Decision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            upgrade_suggestion: None,
            usage: None,
            degraded: false,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            upgrade_suggestion: None,
            usage: None,
            degraded: false,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: UsageSnapshot) -> Self {
        self.usage = Some(usage);
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: Option<UpgradeSuggestion>) -> Self {
        self.upgrade_suggestion = suggestion;
        self
    }

    #[must_use]
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

impl IntoResponse for Decision {
    /// 200 when allowed, 402 for a plan denial, 503 when the store could not
    /// confirm the action.
    fn into_response(self) -> Response {
        let status = match (self.allowed, self.degraded) {
            (true, _) => StatusCode::OK,
            (false, true) => StatusCode::SERVICE_UNAVAILABLE,
            (false, false) => StatusCode::PAYMENT_REQUIRED,
        };
        (status, Json(self)).into_response()
    }
}
