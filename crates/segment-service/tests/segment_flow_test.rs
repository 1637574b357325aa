//! 分群端到端流程测试
//!
//! 创建分群 -> 试算规则 -> 同步成员 -> worker 变化后调和 -> 更新规则再同步。
//! worker 数据使用 fake 随机生成，断言只依赖规则相关字段。

use std::sync::Arc;

use fake::Fake;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::{FirstName, LastName};
use rule_engine::{FieldDefinition, FieldType, RuleEngine, ValidationErrorType};
use segment_service::dto::{CreateSegmentRequest, RuleTestOptions, SyncOptions};
use segment_service::{
    InMemorySegmentStore, InMemoryWorkerReader, RuleTestingService, SegmentDefinitionService,
    SegmentError, SegmentMembershipService, SegmentType, Worker,
};
use segment_shared::config::{RuleTestingConfig, SyncConfig};
use serde_json::{Value, json};

const ORG: &str = "org-acme";

struct Fixture {
    workers: Arc<InMemoryWorkerReader>,
    definitions: SegmentDefinitionService<InMemorySegmentStore>,
    memberships: SegmentMembershipService<InMemoryWorkerReader, InMemorySegmentStore>,
    testing: RuleTestingService<InMemoryWorkerReader>,
}

fn fixture(workers: Vec<Worker>) -> Fixture {
    let engine = Arc::new(RuleEngine::default());
    engine.register_custom_field(
        ORG,
        FieldDefinition::new("customFields.shift", FieldType::String, "Shift"),
    );

    let workers = Arc::new(InMemoryWorkerReader::with_workers(workers));
    let store = Arc::new(InMemorySegmentStore::new());

    Fixture {
        definitions: SegmentDefinitionService::new(Arc::clone(&store), Arc::clone(&engine)),
        memberships: SegmentMembershipService::new(
            Arc::clone(&workers),
            Arc::clone(&store),
            Arc::clone(&engine),
            SyncConfig::default(),
        ),
        testing: RuleTestingService::new(
            Arc::clone(&workers),
            engine,
            RuleTestingConfig::default(),
        ),
        workers,
    }
}

fn fake_worker(id: &str, department: &str, shift: &str, score: i64) -> Worker {
    let first: String = FirstName().fake();
    let last: String = LastName().fake();
    let email: String = SafeEmail().fake();

    Worker::new(
        id,
        ORG,
        json!({
            "firstName": first,
            "lastName": last,
            "email": email,
            "employment": {"department": department, "status": "active"},
            "engagement": {"score": score},
            "customFields": {"shift": shift}
        }),
    )
}

/// 20 个 worker：偶数在 Sales，每 4 个中有一个夜班
fn workforce() -> Vec<Worker> {
    (0..20)
        .map(|i| {
            fake_worker(
                &format!("w-{:02}", i),
                if i % 2 == 0 { "Sales" } else { "Support" },
                if i % 4 == 0 { "night" } else { "day" },
                i * 5,
            )
        })
        .collect()
}

fn night_sales_rule() -> Value {
    json!({"rootGroup": {"operator": "AND", "conditions": [
        {"field": "employment.department", "operator": "equals", "value": "Sales"},
        {"field": "customFields.shift", "operator": "equals", "value": "night"}
    ], "groups": []}})
}

fn create_request(rule: Value) -> CreateSegmentRequest {
    CreateSegmentRequest {
        name: "Night sales".to_string(),
        segment_type: SegmentType::RuleBased,
        organization_id: ORG.to_string(),
        rule_definition: Some(rule),
    }
}

#[tokio::test]
async fn test_full_segment_lifecycle() {
    let f = fixture(workforce());

    // 1. 先试算
    let mut options = RuleTestOptions::new(ORG);
    options.include_non_matches = true;
    let preview = f.testing.test_rule(&night_sales_rule(), options).await;

    assert!(preview.valid);
    assert_eq!(preview.stats.total_evaluated, 20);
    assert_eq!(preview.stats.matched, 5);
    assert_eq!(preview.stats.match_percentage, 25.0);
    assert_eq!(preview.matches.len(), 5);
    assert_eq!(preview.non_matches.len(), 5);
    assert!(preview.matches.iter().all(|s| !s.display_name.is_empty()));

    // 2. 创建并同步
    let segment = f
        .definitions
        .create_segment(create_request(night_sales_rule()))
        .await
        .unwrap();
    let result = f
        .memberships
        .synchronize_segment(segment.id, SyncOptions::full())
        .await
        .unwrap();

    assert_eq!((result.processed, result.matched, result.added), (20, 5, 5));

    // 试算与同步结果一致
    let preview_ids: Vec<String> = preview.matches.iter().map(|s| s.worker_id.clone()).collect();
    let members = f.memberships.member_ids(segment.id).await.unwrap();
    assert!(preview_ids.iter().all(|id| members.contains(id)));

    // 3. 单个 worker 换班后调和
    f.workers.insert(fake_worker("w-02", "Sales", "night", 10));
    let reconciled = f
        .memberships
        .reconcile_for_changed_fields("w-02", ORG, &["customFields.shift".to_string()])
        .await
        .unwrap();
    assert_eq!(reconciled.added, vec![segment.id]);

    // 4. 更新规则后再次同步，旧的规则成员被移除
    let wider = json!({"rootGroup": {"operator": "AND", "conditions": [
        {"field": "engagement.score", "operator": "greater_than_or_equal", "value": 80}
    ]}});
    f.definitions
        .update_segment_rule(segment.id, &wider)
        .await
        .unwrap();
    let result = f
        .memberships
        .synchronize_segment(segment.id, SyncOptions::full())
        .await
        .unwrap();

    // score >= 80：w-16..w-19
    assert_eq!(result.matched, 4);
    let members = f.memberships.member_ids(segment.id).await.unwrap();
    assert_eq!(members.len(), 4);
    assert!(members.contains("w-16"));
    assert!(!members.contains("w-00"));

    let jobs = f
        .memberships
        .list_recent_sync_jobs(segment.id, 1)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, result.sync_job_id);
}

#[tokio::test]
async fn test_invalid_rule_never_reaches_store() {
    let f = fixture(workforce());
    let rule = json!({"rootGroup": {"operator": "AND", "conditions": [
        {"field": "customFields.unknown", "operator": "equals", "value": "x"},
        {"field": "engagement.score", "operator": "between", "value": [10]}
    ]}});

    let err = f
        .definitions
        .create_segment(create_request(rule.clone()))
        .await
        .unwrap_err();

    let SegmentError::InvalidRule(report) = err else {
        panic!("expected InvalidRule, got {:?}", err);
    };
    assert_eq!(report.errors.len(), 2);
    assert!(report.has_error(ValidationErrorType::UnknownField));
    assert!(report.has_error(ValidationErrorType::InvalidValue));
    assert!(f.definitions.list_segments(ORG).await.unwrap().is_empty());

    // 试算返回同样的错误，不抛出
    let preview = f.testing.test_rule(&rule, RuleTestOptions::new(ORG)).await;
    assert!(!preview.valid);
    assert_eq!(preview.validation_errors, report.errors);
}

#[tokio::test]
async fn test_explain_worker_match() {
    let f = fixture(workforce());

    let explanation = f
        .testing
        .explain_worker_rule_match("w-04", &night_sales_rule())
        .await
        .unwrap();

    assert!(explanation.matches);
    assert_eq!(
        explanation.relevant_fields.get("customFields.shift"),
        Some(&json!("night"))
    );
    assert!(explanation.explanation.contains("customFields.shift"));

    let explanation = f
        .testing
        .explain_worker_rule_match("w-01", &night_sales_rule())
        .await
        .unwrap();
    assert!(!explanation.matches);
    assert_eq!(
        explanation.relevant_fields.get("employment.department"),
        Some(&json!("Support"))
    );
}

#[tokio::test]
async fn test_deleting_segment_drops_memberships() {
    let f = fixture(workforce());
    let segment = f
        .definitions
        .create_segment(create_request(night_sales_rule()))
        .await
        .unwrap();
    f.memberships
        .synchronize_segment(segment.id, SyncOptions::full())
        .await
        .unwrap();

    f.definitions.delete_segment(segment.id).await.unwrap();

    assert!(matches!(
        f.memberships.member_ids(segment.id).await,
        Err(SegmentError::SegmentNotFound(_))
    ));
    assert!(matches!(
        f.memberships
            .synchronize_segment(segment.id, SyncOptions::full())
            .await,
        Err(SegmentError::SegmentNotFound(_))
    ));
}
