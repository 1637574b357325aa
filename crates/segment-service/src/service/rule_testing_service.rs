//! 规则试算服务
//!
//! 在不写入任何成员关系的前提下，对样本 worker 试算规则，
//! 返回命中/未命中样本和统计；也支持解释单个 worker 为什么命中或未命中。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rule_engine::{FieldLookup, RuleEngine, SegmentRule};
use segment_shared::config::RuleTestingConfig;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{Result, SegmentError};
use crate::models::Worker;
use crate::repository::WorkerReader;
use crate::service::dto::{
    MatchExplanation, RuleTestOptions, RuleTestResult, RuleTestStats, WorkerSample,
};

/// 规则试算服务
pub struct RuleTestingService<W>
where
    W: WorkerReader,
{
    workers: Arc<W>,
    engine: Arc<RuleEngine>,
    config: RuleTestingConfig,
}

impl<W> RuleTestingService<W>
where
    W: WorkerReader,
{
    pub fn new(workers: Arc<W>, engine: Arc<RuleEngine>, config: RuleTestingConfig) -> Self {
        Self {
            workers,
            engine,
            config,
        }
    }

    /// 样本大小限制在 [1, max_sample_size]
    fn sample_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_sample_size)
            .clamp(1, self.config.max_sample_size.max(1))
    }

    /// 试算规则
    ///
    /// 先校验，校验失败直接返回错误列表；读取 worker 失败时写入结果的 `error` 字段。
    #[instrument(skip(self, definition, options), fields(organization_id = %options.organization_id))]
    pub async fn test_rule(&self, definition: &Value, options: RuleTestOptions) -> RuleTestResult {
        let report = self
            .engine
            .validate_rule(definition, Some(&options.organization_id));
        if !report.valid {
            info!(error_count = report.errors.len(), "试算规则未通过校验");
            return RuleTestResult {
                valid: false,
                validation_errors: report.errors,
                ..Default::default()
            };
        }

        let rule = match self.engine.parse_rule_value(definition.clone()) {
            Ok(rule) => rule,
            Err(e) => {
                return RuleTestResult {
                    valid: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let mut result = RuleTestResult {
            valid: true,
            rule_description: Some(self.engine.rule_to_human_readable(&rule)),
            ..Default::default()
        };

        let workers = match self.resolve_sample(&options).await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "读取试算样本失败");
                result.error = Some(e.to_string());
                return result;
            }
        };

        let evaluation = self.engine.evaluate_rule_for_worker_batch(&rule, &workers);
        let cap = self.config.sample_cap;

        for worker in &workers {
            let Some(detail) = evaluation.match_details.get(&worker.id) else {
                continue;
            };

            let samples = if detail.matched {
                &mut result.matches
            } else if options.include_non_matches {
                &mut result.non_matches
            } else {
                continue;
            };

            if samples.len() < cap {
                samples.push(WorkerSample {
                    worker_id: worker.id.clone(),
                    display_name: worker.display_name(),
                    reason: detail.reason.clone(),
                });
            }
        }

        result.stats = RuleTestStats::new(
            evaluation.stats.total,
            evaluation.stats.matched,
            evaluation.stats.elapsed_ms,
        );

        info!(
            total = result.stats.total_evaluated,
            matched = result.stats.matched,
            percentage = result.stats.match_percentage,
            "规则试算完成"
        );
        result
    }

    /// 样本来源：显式 ID > 整个组织（需显式开启）> 有限的第一页
    async fn resolve_sample(&self, options: &RuleTestOptions) -> Result<Vec<Worker>> {
        if let Some(ids) = &options.specific_worker_ids {
            // 重复 ID 只评估一次，与同步路径一致
            let mut seen = HashSet::new();
            let workers = self.workers.get_by_ids(ids).await?;
            return Ok(workers
                .into_iter()
                .filter(|w| w.organization_id == options.organization_id)
                .filter(|w| seen.insert(w.id.clone()))
                .collect());
        }

        if options.test_against_all_workers {
            warn!(organization_id = %options.organization_id, "对整个组织试算规则");
            return self.workers.get_all(&options.organization_id).await;
        }

        let page = self
            .workers
            .get_by_organization(
                &options.organization_id,
                1,
                self.sample_size(options.sample_size),
            )
            .await?;
        Ok(page.records)
    }

    /// 解释单个 worker 的规则命中情况
    #[instrument(skip(self, definition))]
    pub async fn explain_worker_rule_match(
        &self,
        worker_id: &str,
        definition: &Value,
    ) -> Result<MatchExplanation> {
        let worker = self
            .workers
            .get_by_id(worker_id)
            .await?
            .ok_or_else(|| SegmentError::WorkerNotFound(worker_id.to_string()))?;

        let report = self
            .engine
            .validate_rule(definition, Some(&worker.organization_id));
        if !report.valid {
            return Err(SegmentError::InvalidRule(report));
        }
        let rule = self.engine.parse_rule_value(definition.clone())?;

        Ok(self.explain(&worker, &rule))
    }

    fn explain(&self, worker: &Worker, rule: &SegmentRule) -> MatchExplanation {
        let outcome = self.engine.evaluate_rule_for_worker(rule, worker);
        let rule_description = self.engine.rule_to_human_readable(rule);

        let relevant_fields = self
            .engine
            .referenced_fields(rule)
            .into_iter()
            .map(|path| {
                let value = worker.field(&path).cloned().unwrap_or(Value::Null);
                (path, value)
            })
            .collect::<BTreeMap<_, _>>();

        let explanation = match &outcome.reason {
            Some(reason) if outcome.matched => {
                format!("{} 满足规则，命中条件: {}", worker.display_name(), reason)
            }
            _ => format!("{} 不满足规则: {}", worker.display_name(), rule_description),
        };

        MatchExplanation {
            worker_id: worker.id.clone(),
            matches: outcome.matched,
            explanation,
            rule_description,
            relevant_fields,
        }
    }
}
