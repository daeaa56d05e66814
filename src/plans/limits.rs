//! Limit values and the fixed set of resources and capabilities a plan governs.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TiergateError;

/// A numeric plan limit.
///
/// `Unlimited` compares greater than every finite value. In serialized
/// configuration it is written as `-1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Limit {
    Unlimited,
    Finite(u64),
}

impl Limit {
    /// The serialized form of [`Limit::Unlimited`].
    pub const UNLIMITED_SENTINEL: i64 = -1;

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// The finite ceiling, or `None` for unlimited.
    #[must_use]
    pub fn finite(&self) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::Finite(n) => Some(*n),
        }
    }

    /// Whether one more unit fits on top of `current`.
    #[must_use]
    pub fn admits_one_more(&self, current: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Finite(max) => current < *max,
        }
    }

    /// How far `current` is over the limit. Zero when within it.
    #[must_use]
    pub fn excess(&self, current: u64) -> u64 {
        match self {
            Self::Unlimited => 0,
            Self::Finite(max) => current.saturating_sub(*max),
        }
    }
}

impl Ord for Limit {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Unlimited, Self::Unlimited) => Ordering::Equal,
            (Self::Unlimited, Self::Finite(_)) => Ordering::Greater,
            (Self::Finite(_), Self::Unlimited) => Ordering::Less,
            (Self::Finite(a), Self::Finite(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Limit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Finite(n) => write!(f, "{}", n),
        }
    }
}

impl From<u64> for Limit {
    fn from(n: u64) -> Self {
        Self::Finite(n)
    }
}

impl TryFrom<i64> for Limit {
    type Error = TiergateError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            Self::UNLIMITED_SENTINEL => Ok(Self::Unlimited),
            n if n >= 0 => Ok(Self::Finite(n as u64)),
            n => Err(TiergateError::configuration(format!(
                "limit {} is negative; use -1 for unlimited",
                n
            ))),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_i64(Self::UNLIMITED_SENTINEL),
            Self::Finite(n) => serializer.serialize_u64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Limit::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// How a resource is counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Consumed per billing period; counted by the counter store.
    Metered,
    /// Held over time; the count is the number of active rows.
    Live,
}

/// Every resource a plan puts a numeric limit on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    #[serde(alias = "themeAnalysis")]
    ThemeAnalysis,
    #[serde(alias = "performanceAudit")]
    PerformanceAudit,
    #[serde(alias = "aiRecommendation")]
    AiRecommendation,
    Workspaces,
    #[serde(alias = "teamMembers")]
    TeamMembers,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::ThemeAnalysis,
        Resource::PerformanceAudit,
        Resource::AiRecommendation,
        Resource::Workspaces,
        Resource::TeamMembers,
    ];

    pub const METERED: [Resource; 3] = [
        Resource::ThemeAnalysis,
        Resource::PerformanceAudit,
        Resource::AiRecommendation,
    ];

    pub const LIVE: [Resource; 2] = [Resource::Workspaces, Resource::TeamMembers];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThemeAnalysis => "theme_analysis",
            Self::PerformanceAudit => "performance_audit",
            Self::AiRecommendation => "ai_recommendation",
            Self::Workspaces => "workspaces",
            Self::TeamMembers => "team_members",
        }
    }

    #[must_use]
    pub fn class(&self) -> ResourceClass {
        match self {
            Self::ThemeAnalysis | Self::PerformanceAudit | Self::AiRecommendation => {
                ResourceClass::Metered
            }
            Self::Workspaces | Self::TeamMembers => ResourceClass::Live,
        }
    }

    /// Human-readable noun used in denial reasons.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ThemeAnalysis => "theme analyses",
            Self::PerformanceAudit => "performance audits",
            Self::AiRecommendation => "AI recommendations",
            Self::Workspaces => "workspaces",
            Self::TeamMembers => "team members",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resource {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "themeanalysis" => Ok(Self::ThemeAnalysis),
            "performanceaudit" => Ok(Self::PerformanceAudit),
            "airecommendation" => Ok(Self::AiRecommendation),
            "workspaces" => Ok(Self::Workspaces),
            "teammembers" => Ok(Self::TeamMembers),
            _ => Err(TiergateError::configuration(format!(
                "unknown resource '{}'",
                s
            ))),
        }
    }
}

/// Every boolean feature a plan can switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[serde(alias = "advancedExport")]
    AdvancedExport,
    #[serde(alias = "scheduledScans")]
    ScheduledScans,
    #[serde(alias = "apiAccess")]
    ApiAccess,
    #[serde(alias = "prioritySupport")]
    PrioritySupport,
    #[serde(alias = "whiteLabelReports")]
    WhiteLabelReports,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::AdvancedExport,
        Capability::ScheduledScans,
        Capability::ApiAccess,
        Capability::PrioritySupport,
        Capability::WhiteLabelReports,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdvancedExport => "advanced_export",
            Self::ScheduledScans => "scheduled_scans",
            Self::ApiAccess => "api_access",
            Self::PrioritySupport => "priority_support",
            Self::WhiteLabelReports => "white_label_reports",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::AdvancedExport => "Advanced export",
            Self::ScheduledScans => "Scheduled scans",
            Self::ApiAccess => "API access",
            Self::PrioritySupport => "Priority support",
            Self::WhiteLabelReports => "White-label reports",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = TiergateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "advancedexport" => Ok(Self::AdvancedExport),
            "scheduledscans" => Ok(Self::ScheduledScans),
            "apiaccess" => Ok(Self::ApiAccess),
            "prioritysupport" => Ok(Self::PrioritySupport),
            "whitelabelreports" => Ok(Self::WhiteLabelReports),
            _ => Err(TiergateError::configuration(format!(
                "unknown capability '{}'",
                s
            ))),
        }
    }
}

// "themeAnalysis", "theme_analysis" and "theme-analysis" all collapse to "themeanalysis".
fn normalize_name(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_orders_above_finite() {
        assert!(Limit::Unlimited > Limit::Finite(u64::MAX));
        assert!(Limit::Finite(3) < Limit::Finite(4));
        assert_eq!(Limit::Unlimited.cmp(&Limit::Unlimited), Ordering::Equal);
    }

    #[test]
    fn test_admits_one_more() {
        assert!(Limit::Finite(5).admits_one_more(4));
        assert!(!Limit::Finite(5).admits_one_more(5));
        assert!(!Limit::Finite(0).admits_one_more(0));
        assert!(Limit::Unlimited.admits_one_more(u64::MAX));
    }

    #[test]
    fn test_excess() {
        assert_eq!(Limit::Finite(1).excess(8), 7);
        assert_eq!(Limit::Finite(10).excess(8), 0);
        assert_eq!(Limit::Unlimited.excess(1_000), 0);
    }

    #[test]
    fn test_limit_sentinel_serde() {
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Limit::Finite(25)).unwrap(), "25");

        let parsed: Limit = serde_json::from_str("-1").unwrap();
        assert_eq!(parsed, Limit::Unlimited);
        let parsed: Limit = serde_json::from_str("250").unwrap();
        assert_eq!(parsed, Limit::Finite(250));

        assert!(serde_json::from_str::<Limit>("-2").is_err());
    }

    #[test]
    fn test_resource_from_str_accepts_both_spellings() {
        assert_eq!(
            "themeAnalysis".parse::<Resource>().unwrap(),
            Resource::ThemeAnalysis
        );
        assert_eq!(
            "theme_analysis".parse::<Resource>().unwrap(),
            Resource::ThemeAnalysis
        );
        assert_eq!(
            "teamMembers".parse::<Resource>().unwrap(),
            Resource::TeamMembers
        );

        let err = "themes".parse::<Resource>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_capability_from_str() {
        assert_eq!(
            "whiteLabelReports".parse::<Capability>().unwrap(),
            Capability::WhiteLabelReports
        );
        assert_eq!(
            "api_access".parse::<Capability>().unwrap(),
            Capability::ApiAccess
        );
        assert!("teleport".parse::<Capability>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_resource_serde_alias() {
        let r: Resource = serde_json::from_str("\"performanceAudit\"").unwrap();
        assert_eq!(r, Resource::PerformanceAudit);
        assert_eq!(
            serde_json::to_string(&Resource::PerformanceAudit).unwrap(),
            "\"performance_audit\""
        );
    }

    #[test]
    fn test_resource_class() {
        for r in Resource::METERED {
            assert_eq!(r.class(), ResourceClass::Metered);
        }
        for r in Resource::LIVE {
            assert_eq!(r.class(), ResourceClass::Live);
        }
    }
}
