//! Entitlements and feature gating.
//!
//! An entitlement is a plan plus live usage. [`EntitlementEvaluator`] turns
//! an [`Action`] into a [`Decision`]: allowed or not, why, and which tier
//! would allow it.
//!
//! ```rust,ignore
//! let decision = evaluator
//!     .can_perform(&subscription.plan_id, "themeAnalysis".parse()?, &shop_id)
//!     .await?;
//! if !decision.allowed {
//!     return Ok(decision.into_response()); // 402 with upgrade suggestion
//! }
//! ```

mod decision;
mod evaluator;

pub use decision::{Action, Decision, UpgradeSuggestion, UsageSnapshot};
pub use evaluator::EntitlementEvaluator;
