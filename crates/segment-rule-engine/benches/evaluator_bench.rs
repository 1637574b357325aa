//! 规则评估性能基准测试
//!
//! 覆盖单个操作符评估，以及不同批次大小下的批量规则评估。

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rule_engine::{
    Condition, ConditionEvaluator, EvaluationContext, Operator, RuleEngine, RuleGroup, SegmentRule,
};
use serde_json::{Value, json};
use std::hint::black_box;

fn bench_operator(c: &mut Criterion, name: &str, field: Value, operator: Operator, expected: Value) {
    c.bench_function(name, |b| {
        b.iter(|| {
            ConditionEvaluator::evaluate(
                black_box(Some(&field)),
                black_box(operator),
                black_box(Some(&expected)),
            )
        })
    });
}

/// 单个操作符评估基准
fn bench_operators(c: &mut Criterion) {
    bench_operator(c, "op_equals", json!("Sales"), Operator::Equals, json!("Sales"));
    bench_operator(c, "op_greater_than", json!(1000), Operator::GreaterThan, json!(500));
    bench_operator(c, "op_between", json!(42), Operator::Between, json!([10, 100]));
    bench_operator(c, "op_contains", json!("hello world"), Operator::Contains, json!("world"));
    bench_operator(
        c,
        "op_has_any",
        json!(["a", "b", "c", "d", "e"]),
        Operator::HasAny,
        json!(["x", "d"]),
    );
    bench_operator(
        c,
        "op_in",
        json!("Paris"),
        Operator::In,
        json!(["London", "Berlin", "Paris", "Madrid"]),
    );
    bench_operator(
        c,
        "op_matches_cached",
        json!("jane.doe@example.com"),
        Operator::Matches,
        json!(r"^[\w.]+@example\.com$"),
    );
    bench_operator(
        c,
        "op_before",
        json!("2023-03-01"),
        Operator::Before,
        json!("2024-01-01T00:00:00Z"),
    );
}

fn sample_rule() -> SegmentRule {
    SegmentRule::new(
        RuleGroup::and(vec![
            Condition::new("employment.department", Operator::Equals, "Sales"),
            Condition::new("engagement.score", Operator::GreaterThanOrEqual, 50),
        ])
        .with_group(RuleGroup::or(vec![
            Condition::new("tags", Operator::HasAny, json!(["vip", "champion"])),
            Condition::new("employment.startDate", Operator::Before, "2022-01-01"),
        ])),
    )
}

fn sample_workers(n: usize) -> Vec<EvaluationContext> {
    let departments = ["Sales", "IT", "Support", "Finance"];

    (0..n)
        .map(|i| {
            let department = departments[i % departments.len()];
            let tags = if i % 5 == 0 { json!(["vip"]) } else { json!(["new"]) };
            let score = (i * 7) % 100;
            let start_date = format!("20{:02}-06-15", 15 + i % 10);
            EvaluationContext::new(
                format!("worker-{}", i),
                json!({
                    "firstName": format!("Worker{}", i),
                    "employment": {"department": department, "startDate": start_date},
                    "engagement": {"score": score},
                    "tags": tags
                }),
            )
        })
        .collect()
}

/// 批量评估基准：批次大小不影响结果，只影响缓存占用
fn bench_batch_evaluation(c: &mut Criterion) {
    let rule = sample_rule();
    let workers = sample_workers(10_000);

    let mut group = c.benchmark_group("batch_evaluation");
    group.throughput(Throughput::Elements(workers.len() as u64));

    for batch_size in [100, 1000, 10_000] {
        let engine = RuleEngine::with_batch_size(batch_size);
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, _| b.iter(|| engine.evaluate_rule_for_worker_batch(black_box(&rule), black_box(&workers))),
        );
    }

    group.finish();
}

/// 单条记录直接评估基准
fn bench_single_worker(c: &mut Criterion) {
    let rule = sample_rule();
    let workers = sample_workers(1);
    let worker = &workers[0];

    c.bench_function("single_worker_evaluation", |b| {
        b.iter(|| rule.evaluate(black_box(worker)))
    });
}

criterion_group!(
    benches,
    bench_operators,
    bench_batch_evaluation,
    bench_single_worker
);
criterion_main!(benches);
