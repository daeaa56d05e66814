//! Plan changes driven through the manager, and HTTP mapping of outcomes.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tiergate::audit::RecordingAuditLogger;
use tiergate::storage::test::{InMemoryResourceStore, InMemorySubscriptionStore};
use tiergate::{
    Action, ChangeDirection, Decision, DowngradeExecutor, EntitlementEvaluator, FixedClock,
    InMemoryCounterStore, PlanCatalog, PlanChangeManager, RateLimitConfig, RateLimiter, Resource,
    Subscription, SubscriptionStatus, TiergateError, UsageMeter,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn manager(
    plan: &str,
    anchor: NaiveDate,
) -> PlanChangeManager<InMemoryResourceStore, InMemorySubscriptionStore, RecordingAuditLogger> {
    let subscriptions = InMemorySubscriptionStore::new();
    subscriptions.insert(Subscription::new("shop_1", plan, anchor));
    PlanChangeManager::new(
        DowngradeExecutor::new(
            Arc::new(PlanCatalog::standard()),
            InMemoryResourceStore::new(),
            subscriptions,
        )
        .with_audit_logger(RecordingAuditLogger::new()),
    )
}

#[tokio::test]
async fn test_month_end_anchor_proration() {
    // Anchor on the 31st: the February cycle ends on the 28th
    let manager = manager("starter", date(2026, 1, 31));
    let preview = manager
        .preview_change("shop_1", "pro", date(2026, 2, 14))
        .await
        .unwrap();

    assert_eq!(preview.cycle.start, date(2026, 1, 31));
    assert_eq!(preview.cycle.end, date(2026, 2, 28));
    assert_eq!(preview.cycle.total_days(), 28);

    let proration = preview.proration.unwrap();
    // 14 of 28 days left
    assert_eq!(proration.credit, dec!(14.50));
    assert_eq!(proration.charge, dec!(39.50));
    assert_eq!(proration.net, dec!(25.00));
}

#[tokio::test]
async fn test_downgrade_preview_carries_impact() {
    let manager = manager("pro", date(2026, 1, 1));
    let preview = manager
        .preview_change("shop_1", "free", date(2026, 1, 20))
        .await
        .unwrap();

    assert_eq!(preview.direction, ChangeDirection::Downgrade);
    let impact = preview.impact.unwrap();
    assert!(!impact.is_empty());
    assert!(preview.proration.unwrap().is_refund());

    let json = serde_json::to_value(manager.preview_change("shop_1", "free", date(2026, 1, 20)).await.unwrap()).unwrap();
    assert_eq!(json["direction"], "downgrade");
    assert_eq!(json["impact"]["warnings"][0]["type"], "capability_lost");
}

#[tokio::test]
async fn test_unknown_target_plan_is_configuration_error() {
    let manager = manager("pro", date(2026, 1, 1));
    let err = manager
        .preview_change("shop_1", "platinum", date(2026, 1, 20))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_upgrade_then_gate_opens() {
    let manager = manager("free", date(2026, 1, 1));
    manager
        .apply_change("shop_1", "pro", date(2026, 1, 5), false)
        .await
        .unwrap();

    let evaluator = EntitlementEvaluator::new(
        Arc::new(PlanCatalog::standard()),
        UsageMeter::new(InMemoryCounterStore::new()),
        InMemoryResourceStore::new(),
    );
    let decision = evaluator
        .can_perform_for(
            manager.executor().subscriptions(),
            "apiAccess".parse::<Action>().unwrap(),
            "shop_1",
        )
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_canceled_subject_falls_back_to_lowest_tier() {
    let subscriptions = InMemorySubscriptionStore::new();
    let mut sub = Subscription::new("shop_1", "agency", date(2026, 1, 1));
    sub.status = SubscriptionStatus::Canceled;
    subscriptions.insert(sub);

    let evaluator = EntitlementEvaluator::new(
        Arc::new(PlanCatalog::standard()),
        UsageMeter::new(InMemoryCounterStore::new()),
        InMemoryResourceStore::new(),
    );
    let decision = evaluator
        .can_perform_for(&subscriptions, Action::Consume(Resource::AiRecommendation), "shop_1")
        .await
        .unwrap();
    assert!(decision.is_denied());
    assert_eq!(decision.upgrade_suggestion.unwrap().plan_id, "starter");
}

#[tokio::test]
async fn test_missing_subscription_is_not_found() {
    let manager = manager("pro", date(2026, 1, 1));
    let err = manager
        .apply_change("shop_2", "free", date(2026, 1, 20), true)
        .await
        .unwrap_err();
    assert!(matches!(err, TiergateError::NotFound(_)));
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_decision_status_codes() {
    assert_eq!(Decision::allow().into_response().status(), StatusCode::OK);
    assert_eq!(
        Decision::deny("over quota").into_response().status(),
        StatusCode::PAYMENT_REQUIRED
    );
    assert_eq!(
        Decision::deny("store down").degraded().into_response().status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_rate_limited_response_has_retry_after() {
    let clock = Arc::new(FixedClock::new(
        date(2026, 3, 14).and_hms_opt(9, 26, 45).unwrap().and_utc(),
    ));
    let limiter = RateLimiter::new(
        InMemoryCounterStore::new(),
        clock,
        RateLimitConfig::builder().max_per_minute(1).build(),
    );

    assert!(limiter.check("shop_1", "export").await.unwrap().allowed);
    let denied = limiter.check("shop_1", "export").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs, 15);

    let response = denied.into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "15");
}
