//! 批量评估优化器
//!
//! 对一批记录评估同一条规则时，先分析规则引用了哪些字段，
//! 每条记录只把这些字段取一次放进缓存，再用缓存评估，批次结束即丢弃缓存。
//! 批次划分只影响内存占用，不影响评估结果。

use crate::fields::FieldAccessor;
use crate::models::{FieldLookup, Record, SegmentRule};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

/// 默认批次大小
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// 单条记录的评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEvaluation {
    pub record_id: String,
    pub matched: bool,
    pub reason: Option<String>,
}

/// 为某条规则准备好的字段访问器集合
#[derive(Debug, Clone)]
pub struct PreparedRule {
    rule: SegmentRule,
    accessors: Vec<FieldAccessor>,
}

impl PreparedRule {
    pub fn rule(&self) -> &SegmentRule {
        &self.rule
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.accessors.iter().map(FieldAccessor::path)
    }

    /// 对每条记录把规则引用的字段各取一次，按记录 ID 缓存
    pub fn preload_worker_values<'a, R: Record>(&'a self, records: &'a [R]) -> ValueCache<'a> {
        let entries = records
            .iter()
            .map(|record| {
                let document = record.document();
                let values = self
                    .accessors
                    .iter()
                    .filter_map(|accessor| {
                        accessor
                            .resolve(document)
                            .map(|value| (accessor.path(), value))
                    })
                    .collect();
                (record.record_id(), CachedRecord { values })
            })
            .collect();

        ValueCache { entries }
    }
}

/// 单条记录的预取字段
///
/// 缓存里没有的路径视为字段缺失。
#[derive(Debug)]
pub struct CachedRecord<'a> {
    values: HashMap<&'a str, &'a Value>,
}

impl FieldLookup for CachedRecord<'_> {
    fn field(&self, path: &str) -> Option<&Value> {
        self.values.get(path).copied()
    }
}

/// 一个批次的字段缓存，生命周期不超过该批次
#[derive(Debug, Default)]
pub struct ValueCache<'a> {
    entries: HashMap<&'a str, CachedRecord<'a>>,
}

impl<'a> ValueCache<'a> {
    pub fn get(&self, record_id: &str) -> Option<&CachedRecord<'a>> {
        self.entries.get(record_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 规则评估优化器
#[derive(Debug, Clone)]
pub struct RuleEvaluationOptimizer {
    batch_size: usize,
}

impl RuleEvaluationOptimizer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 规则引用的字段集合
    pub fn analyze_rule(&self, rule: &SegmentRule) -> BTreeSet<String> {
        rule.referenced_fields()
    }

    /// 每个不同字段路径构造一个访问器
    pub fn prepare_for_rule(&self, rule: &SegmentRule) -> PreparedRule {
        let accessors = self
            .analyze_rule(rule)
            .into_iter()
            .map(FieldAccessor::new)
            .collect();

        PreparedRule {
            rule: rule.clone(),
            accessors,
        }
    }

    /// 评估一个批次：预取、评估、丢弃缓存
    ///
    /// 缓存中找不到的记录回退到直接按路径取值。
    pub fn evaluate_batch<R: Record>(
        &self,
        prepared: &PreparedRule,
        records: &[R],
    ) -> Vec<RecordEvaluation> {
        let cache = prepared.preload_worker_values(records);

        let results: Vec<RecordEvaluation> = records
            .iter()
            .map(|record| {
                let outcome = match cache.get(record.record_id()) {
                    Some(cached) => prepared.rule.evaluate(cached),
                    None => prepared.rule.evaluate(record),
                };

                RecordEvaluation {
                    record_id: record.record_id().to_string(),
                    matched: outcome.matched,
                    reason: outcome.reason,
                }
            })
            .collect();

        debug!(
            batch_len = records.len(),
            cached = cache.len(),
            matched = results.iter().filter(|r| r.matched).count(),
            "批次评估完成"
        );

        results
    }

    /// 按固定批次大小处理任意数量的记录
    #[instrument(skip(self, rule, records), fields(total = records.len(), batch_size = self.batch_size))]
    pub fn process_in_batches<R: Record>(
        &self,
        rule: &SegmentRule,
        records: &[R],
    ) -> Vec<RecordEvaluation> {
        let prepared = self.prepare_for_rule(rule);

        records
            .chunks(self.batch_size)
            .flat_map(|batch| self.evaluate_batch(&prepared, batch))
            .collect()
    }
}

impl Default for RuleEvaluationOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
