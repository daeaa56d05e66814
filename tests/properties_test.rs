//! Property-based tests for the plan hierarchy, limits, and proration.
//!
//! - Higher tiers never offer less than lower ones
//! - Finite limits admit exactly `max` units
//! - Proration stays within the prices and rounds to cents

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tiergate::{BillingCycle, Capability, Limit, PlanCatalog, Resource, prorate};

// ============================================================================
// Strategies
// ============================================================================

fn arb_limit() -> impl Strategy<Value = Limit> {
    prop_oneof![
        1 => Just(Limit::Unlimited),
        4 => (0u64..10_000).prop_map(Limit::Finite),
    ]
}

/// Prices in cents up to 10,000.00
fn arb_price() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn arb_days() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=31).prop_flat_map(|total| (0..=total, Just(total)))
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (0i64..3_650).prop_map(|offset| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset))
}

// ============================================================================
// Hierarchy Properties
// ============================================================================

#[test]
fn standard_catalog_is_monotonic() {
    let catalog = PlanCatalog::standard();
    let plans: Vec<_> = catalog.iter().collect();
    for lower in &plans {
        for higher in plans.iter().filter(|p| p.rank > lower.rank) {
            for resource in Resource::ALL {
                assert!(
                    higher.limit_for(resource) >= lower.limit_for(resource),
                    "{} offers less {} than {}",
                    higher.id,
                    resource,
                    lower.id
                );
            }
            for capability in Capability::ALL {
                assert!(!lower.has_capability(capability) || higher.has_capability(capability));
            }
        }
    }
}

proptest! {
    /// Property: Unlimited outranks every finite limit
    #[test]
    fn prop_unlimited_is_greatest(n in 0u64..u64::MAX) {
        prop_assert!(Limit::Unlimited > Limit::Finite(n));
    }

    /// Property: Finite(max) admits one more exactly while used < max
    #[test]
    fn prop_admits_one_more(max in 0u64..1_000, used in 0u64..2_000) {
        prop_assert_eq!(Limit::Finite(max).admits_one_more(used), used < max);
        prop_assert!(Limit::Unlimited.admits_one_more(used));
    }

    /// Property: Excess is what stands above the limit
    #[test]
    fn prop_excess(limit in arb_limit(), active in 0u64..20_000) {
        let excess = limit.excess(active);
        match limit {
            Limit::Unlimited => prop_assert_eq!(excess, 0),
            Limit::Finite(max) => prop_assert_eq!(excess, active.saturating_sub(max)),
        }
    }

    /// Property: The -1 sentinel survives serialization
    #[test]
    fn prop_limit_json(limit in arb_limit()) {
        let json = serde_json::to_string(&limit).unwrap();
        if limit.is_unlimited() {
            prop_assert_eq!(json.as_str(), "-1");
        }
        let back: Limit = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, limit);
    }
}

// ============================================================================
// Proration Properties
// ============================================================================

proptest! {
    /// Property: Credit and charge never exceed the full prices
    #[test]
    fn prop_proration_bounded(
        (remaining, total) in arb_days(),
        old in arb_price(),
        new in arb_price(),
    ) {
        let p = prorate(remaining, total, old, new).unwrap();
        prop_assert!(p.credit >= Decimal::ZERO && p.credit <= old);
        prop_assert!(p.charge >= Decimal::ZERO && p.charge <= new);
        prop_assert_eq!(p.net, p.charge - p.credit);
        prop_assert!(p.net.scale() <= 2);
    }

    /// Property: A full cycle prorates to the full price delta
    #[test]
    fn prop_full_cycle(total in 1u32..=31, old in arb_price(), new in arb_price()) {
        let p = prorate(total, total, old, new).unwrap();
        prop_assert_eq!(p.net, new - old);
    }

    /// Property: Swapping prices flips the sign of net
    #[test]
    fn prop_antisymmetric(
        (remaining, total) in arb_days(),
        a in arb_price(),
        b in arb_price(),
    ) {
        let up = prorate(remaining, total, a, b).unwrap();
        let down = prorate(remaining, total, b, a).unwrap();
        prop_assert_eq!(up.net, -down.net);
    }

    /// Property: The containing cycle contains today and spans one month
    #[test]
    fn prop_cycle_contains_today(anchor in arb_date(), ahead in 0i64..1_000) {
        let today = anchor + Duration::days(ahead);
        let cycle = BillingCycle::containing(anchor, today).unwrap();
        prop_assert!(cycle.start <= today && today < cycle.end);
        prop_assert!((28..=31).contains(&cycle.total_days()));
        let remaining = cycle.days_remaining(today);
        prop_assert!(remaining >= 1 && remaining <= cycle.total_days());
    }
}
