//! Downgrade impact analysis and execution.
//!
//! Two phases:
//! 1. [`plan_downgrade_impact`]: a read-only preview of lost capabilities,
//!    reduced quotas, and live resources over the new limits.
//! 2. [`DowngradeExecutor::execute_downgrade`]: deactivates the excess
//!    (least recently used first) and commits the new plan last.
//!
//! Workspaces over the limit are deactivated, never deleted. Team members over
//! the limit keep their rows and are turned away at access time by
//! [`EntitlementEvaluator::check_member_access`](crate::EntitlementEvaluator::check_member_access).

mod executor;
mod impact;

pub use executor::{DowngradeExecutor, DowngradeReport, StepOutcome};
pub use impact::{DowngradeAction, DowngradeImpact, DowngradeWarning, plan_downgrade_impact};
