use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tiergate::storage::test::InMemoryResourceStore;
use tiergate::{
    Action, Capability, EntitlementEvaluator, InMemoryCounterStore, Limit, PlanCatalog, Resource,
    UsageMeter,
};

fn benchmark_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let meter = UsageMeter::new(InMemoryCounterStore::new());

    group.bench_function("increment_unlimited", |b| {
        b.iter(|| {
            rt.block_on(meter.check_and_increment(
                black_box("shop_1"),
                Resource::ThemeAnalysis,
                Limit::Unlimited,
            ))
            .unwrap();
        });
    });

    // Saturated counter: every call is a denial without a write
    let saturated = UsageMeter::new(InMemoryCounterStore::new());
    rt.block_on(saturated.check_and_increment("shop_1", Resource::PerformanceAudit, Limit::Finite(1)))
        .unwrap();
    group.bench_function("deny_at_limit", |b| {
        b.iter(|| {
            rt.block_on(saturated.check_and_increment(
                black_box("shop_1"),
                Resource::PerformanceAudit,
                Limit::Finite(1),
            ))
            .unwrap();
        });
    });

    group.finish();
}

fn benchmark_evaluator(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let evaluator = EntitlementEvaluator::new(
        Arc::new(PlanCatalog::standard()),
        UsageMeter::new(InMemoryCounterStore::new()),
        InMemoryResourceStore::new(),
    );

    group.bench_function("capability", |b| {
        b.iter(|| {
            rt.block_on(evaluator.can_perform(
                black_box("starter"),
                Action::Use(Capability::ApiAccess),
                "shop_1",
            ))
            .unwrap();
        });
    });

    group.bench_function("metered_agency", |b| {
        b.iter(|| {
            rt.block_on(evaluator.can_perform(
                black_box("agency"),
                Action::Consume(Resource::AiRecommendation),
                "shop_1",
            ))
            .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_counter, benchmark_evaluator);
criterion_main!(benches);
