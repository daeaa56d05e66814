//! Tiergate - subscription tier entitlements for SaaS applications
//!
//! Tiergate answers "may this subject do this right now?" from an ordered
//! plan catalog and live usage, and handles what happens when a subject
//! moves between tiers.
//!
//! # Features
//!
//! - **Plans**: an ordered catalog of tiers with per-resource limits and
//!   boolean capabilities
//! - **Metering**: atomic check-and-increment counters per billing period,
//!   with in-memory, Redis, and PostgreSQL backends
//! - **Entitlements**: allow/deny decisions with the cheapest upgrade that
//!   would unlock a denied action
//! - **Downgrades**: impact previews and idempotent execution that deactivates
//!   the least recently used resources over the new limits
//! - **Proration**: exact decimal credit/charge for mid-cycle changes
//! - **Rate limiting**: per-minute abuse limits on the same counter primitive
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiergate::{
//!     Action, EntitlementEvaluator, InMemoryCounterStore, PlanCatalog, Resource, UsageMeter,
//! };
//!
//! # async fn run<R: tiergate::storage::ResourceStore>(resources: R) -> tiergate::Result<()> {
//! tiergate::init_tracing();
//!
//! let evaluator = EntitlementEvaluator::new(
//!     Arc::new(PlanCatalog::standard()),
//!     UsageMeter::new(InMemoryCounterStore::new()),
//!     resources,
//! );
//!
//! let decision = evaluator
//!     .can_perform("free", Action::Consume(Resource::ThemeAnalysis), "shop_1")
//!     .await?;
//! if !decision.allowed {
//!     // 402 with an upgrade suggestion
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod downgrade;
pub mod entitlements;
mod error;
pub mod metering;
pub mod plan_change;
pub mod plans;
pub mod proration;
pub mod storage;
pub mod utils;

pub use audit::{AuditEvent, AuditLogger, NoOpAuditLogger, TracingAuditLogger};
pub use config::{Config, ConfigBuilder, LoggingConfig, MeteringConfig};
pub use downgrade::{
    DowngradeAction, DowngradeExecutor, DowngradeImpact, DowngradeReport, DowngradeWarning,
    StepOutcome, plan_downgrade_impact,
};
pub use entitlements::{Action, Decision, EntitlementEvaluator, UpgradeSuggestion, UsageSnapshot};
pub use error::{ErrorResponse, Result, TiergateError};
pub use metering::{
    Clock, CounterKey, CounterOutcome, CounterStore, FailurePolicy, FixedClock,
    InMemoryCounterStore, Metered, Period, PeriodKey, RateLimitConfig, RateLimitConfigBuilder,
    RateLimitDecision, RateLimiter, SystemClock, UsageMeter,
};
#[cfg(feature = "redis")]
pub use metering::RedisCounterStore;
pub use plan_change::{ChangeDirection, PlanChangeManager, PlanChangeOutcome, PlanChangePreview};
pub use plans::{Capability, Limit, Plan, PlanCatalog, PlanCatalogBuilder, Requirement, Resource};
pub use proration::{BillingCycle, Proration, prorate};
pub use storage::{
    Enforcement, LiveResource, ResourceKind, ResourceStore, Subscription, SubscriptionStatus,
    SubscriptionStore,
};
#[cfg(feature = "seaorm")]
pub use storage::sea_orm_store::SeaOrmStore;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with sensible defaults.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (e.g. "info", "tiergate=debug",
///   "tiergate::downgrade=trace")
/// - `TIERGATE_LOG_JSON`: set to "true" for JSON formatted logs
///
/// Call once, early in `main`. Panics if a global subscriber is already set;
/// use [`try_init_tracing`] when that is possible.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = utils::env_flag("LOG_JSON").unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a [`LoggingConfig`].
pub fn init_tracing_with_config(config: &LoggingConfig) {
    let env_filter = EnvFilter::new(&config.level);

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Like [`init_tracing_with_config`], but returns `false` instead of
/// panicking when a subscriber is already installed.
pub fn try_init_tracing(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(EnvFilter::new(&config.level));
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}
