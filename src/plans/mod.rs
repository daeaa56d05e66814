//! Plan catalog: the ordered tiers, their limits, and their capabilities.
//!
//! Plans are plain configuration. They are loaded once (from code with
//! [`PlanCatalog::builder`], from JSON with [`PlanCatalog::from_json`], or the
//! shipped [`PlanCatalog::standard`]) and never mutated afterwards.
//!
//! ```rust
//! use tiergate::plans::{Capability, Limit, PlanCatalog, Requirement, Resource};
//!
//! let catalog = PlanCatalog::standard();
//! let free = catalog.get("free").unwrap();
//!
//! assert_eq!(free.limit_for(Resource::ThemeAnalysis), Limit::Finite(5));
//! assert!(!free.has_capability(Capability::ApiAccess));
//!
//! let upgrade = catalog
//!     .cheapest_plan_with(Requirement::Capability(Capability::ApiAccess))
//!     .unwrap();
//! assert_eq!(upgrade.id, "pro");
//! ```

mod catalog;
mod limits;

pub use catalog::{
    Plan, PlanBuilder, PlanCapabilities, PlanCatalog, PlanCatalogBuilder, PlanLimits, Requirement,
};
pub use limits::{Capability, Limit, Resource, ResourceClass};
