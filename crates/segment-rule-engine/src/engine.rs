//! 规则引擎门面
//!
//! 把解析、校验、单条/批量评估和可读描述组合在一起，
//! 供分群服务和规则测试服务使用。

use crate::error::{Result, RuleError};
use crate::fields::{FieldDefinition, FieldRegistry};
use crate::models::{Record, RuleMatch, SegmentRule};
use crate::optimizer::RuleEvaluationOptimizer;
use crate::validator::{RuleValidator, ValidationReport};
use segment_shared::observability::metrics::record_rule_batch;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// 批量评估统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub matched: usize,
    pub elapsed_ms: u64,
}

/// 批量评估结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvaluation {
    /// 命中的记录 ID，保持输入顺序
    pub matched_ids: Vec<String>,
    /// 每条记录的评估明细
    pub match_details: HashMap<String, RuleMatch>,
    pub stats: BatchStats,
}

/// 规则引擎
pub struct RuleEngine {
    validator: RuleValidator,
    optimizer: RuleEvaluationOptimizer,
}

impl RuleEngine {
    pub fn new(registry: FieldRegistry, optimizer: RuleEvaluationOptimizer) -> Self {
        Self {
            validator: RuleValidator::new(registry),
            optimizer,
        }
    }

    /// 使用内置字段白名单和指定批次大小
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self::new(
            FieldRegistry::worker_defaults(),
            RuleEvaluationOptimizer::new(batch_size),
        )
    }

    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    pub fn optimizer(&self) -> &RuleEvaluationOptimizer {
        &self.optimizer
    }

    pub fn register_custom_field(&self, organization_id: &str, definition: FieldDefinition) {
        self.validator.register_custom_field(organization_id, definition);
    }

    /// 从 JSON 文本解析规则，并做结构校验
    pub fn parse_rule(&self, text: &str) -> Result<SegmentRule> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RuleError::ParseError(e.to_string()))?;
        self.parse_rule_value(value)
    }

    /// 从 JSON 对象解析规则，并做结构校验
    ///
    /// 顶层形状错误（非对象、缺少 rootGroup）与校验器的 Structural 判定一致。
    pub fn parse_rule_value(&self, value: Value) -> Result<SegmentRule> {
        if !value.is_object() {
            return Err(RuleError::Structural("规则定义必须是对象".to_string()));
        }
        if matches!(value.get(SegmentRule::ROOT_PATH), None | Some(Value::Null)) {
            return Err(RuleError::Structural("规则定义缺少 rootGroup".to_string()));
        }

        let rule: SegmentRule =
            serde_json::from_value(value).map_err(|e| RuleError::ParseError(e.to_string()))?;
        rule.validate()?;
        Ok(rule)
    }

    /// 规范化的紧凑 JSON 文本
    pub fn serialize_rule(&self, rule: &SegmentRule) -> Result<String> {
        Ok(serde_json::to_string(rule)?)
    }

    pub fn serialize_rule_value(&self, rule: &SegmentRule) -> Result<Value> {
        Ok(serde_json::to_value(rule)?)
    }

    /// 语义校验（字段白名单、操作符、值形状）
    pub fn validate_rule(&self, definition: &Value, organization_id: Option<&str>) -> ValidationReport {
        self.validator.validate_rule(definition, organization_id)
    }

    pub fn validate_segment_rule(
        &self,
        rule: &SegmentRule,
        organization_id: Option<&str>,
    ) -> ValidationReport {
        self.validator.validate_segment_rule(rule, organization_id)
    }

    /// 对单条记录评估规则
    pub fn evaluate_rule_for_worker<R: Record + ?Sized>(&self, rule: &SegmentRule, record: &R) -> RuleMatch {
        let result = rule.evaluate(record);
        debug!(record_id = record.record_id(), matched = result.matched, "规则评估完成");
        result
    }

    /// 批量评估，内部按优化器批次大小分批
    #[instrument(skip(self, rule, records), fields(total = records.len()))]
    pub fn evaluate_rule_for_worker_batch<R: Record>(
        &self,
        rule: &SegmentRule,
        records: &[R],
    ) -> BatchEvaluation {
        let start = Instant::now();
        let evaluations = self.optimizer.process_in_batches(rule, records);

        let mut matched_ids = Vec::new();
        let mut match_details = HashMap::with_capacity(evaluations.len());
        for evaluation in evaluations {
            if evaluation.matched {
                matched_ids.push(evaluation.record_id.clone());
            }
            match_details.insert(
                evaluation.record_id,
                RuleMatch {
                    matched: evaluation.matched,
                    reason: evaluation.reason,
                },
            );
        }

        let elapsed = start.elapsed();
        let stats = BatchStats {
            total: records.len(),
            matched: matched_ids.len(),
            elapsed_ms: elapsed.as_millis() as u64,
        };

        record_rule_batch(stats.total as u64, stats.matched as u64, elapsed.as_secs_f64());
        info!(
            total = stats.total,
            matched = stats.matched,
            elapsed_ms = stats.elapsed_ms,
            "批量规则评估完成"
        );

        BatchEvaluation {
            matched_ids,
            match_details,
            stats,
        }
    }

    /// 可读描述，如 `employment.department equals "Sales" AND tags has any of ["vip"]`
    pub fn rule_to_human_readable(&self, rule: &SegmentRule) -> String {
        rule.describe()
    }

    /// 目前只做结构复制
    pub fn optimize_rule(&self, rule: &SegmentRule) -> SegmentRule {
        rule.clone()
    }

    pub fn referenced_fields(&self, rule: &SegmentRule) -> BTreeSet<String> {
        self.optimizer.analyze_rule(rule)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(FieldRegistry::worker_defaults(), RuleEvaluationOptimizer::default())
    }
}
